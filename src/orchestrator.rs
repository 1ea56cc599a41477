use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, StoreError};
use crate::ledger::validate_address;
use crate::payout::{
    PayoutBatchFile, PayoutExecution, PayoutInstruction, PayoutStatus, RunExecution, RunStatus,
    SkippedPayout,
};
use crate::runner::{AttemptRunner, RunPass};

/// Hooks for reporting progress while a run executes. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn run_started(&self, _payouts: usize) {}
    fn batch_started(&self, _index: usize, _batches: usize, _size: usize) {}
    fn payout_settled(&self, _payout: &PayoutExecution) {}
}

struct Silent;

impl RunObserver for Silent {}

/// Drives runs through batching, attempt execution and finalization.
pub struct PayoutOrchestrator {
    ctx: EngineContext,
    runner: AttemptRunner,
    observer: Arc<dyn RunObserver>,
    active: Mutex<HashSet<String>>,
}

/// Marks a run id as executing until dropped.
struct ActiveRun<'a> {
    active: &'a Mutex<HashSet<String>>,
    run_id: String,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.run_id);
        }
    }
}

impl PayoutOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            runner: AttemptRunner::from_context(&ctx),
            ctx,
            observer: Arc::new(Silent),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn claim(&self, run_id: &str) -> Result<ActiveRun<'_>, EngineError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| EngineError::Config("run registry poisoned".into()))?;
        if !active.insert(run_id.to_string()) {
            return Err(EngineError::RunInProgress(run_id.to_string()));
        }
        Ok(ActiveRun {
            active: &self.active,
            run_id: run_id.to_string(),
        })
    }

    /// Refuse to start a run id that already has a stored record. Re-executing
    /// would resubmit its payouts and overwrite their history.
    async fn ensure_new(&self, run_id: &str) -> Result<(), EngineError> {
        if self.ctx.store.load_run(run_id).await?.is_some() {
            return Err(EngineError::RunExists(run_id.to_string()));
        }
        Ok(())
    }

    /// Execute every eligible payout in `batch` and return the settled run.
    ///
    /// Payout failures never surface as errors; they are counted on the run.
    /// A run id that is executing or already stored is refused.
    pub async fn execute(&self, batch: PayoutBatchFile) -> Result<RunExecution, EngineError> {
        let _guard = self.claim(&batch.run_id)?;
        self.ensure_new(&batch.run_id).await?;
        let mut run = RunExecution::new(&batch.run_id, batch.decimals);
        self.process(&mut run, batch.payouts).await;
        Ok(run)
    }

    /// Like [`execute`](Self::execute), loading the instructions from the store.
    /// A load failure fails the run rather than returning an error.
    pub async fn execute_stored(&self, run_id: &str) -> Result<RunExecution, EngineError> {
        let _guard = self.claim(run_id)?;
        self.ensure_new(run_id).await?;
        match self.ctx.store.load_instructions(run_id).await {
            Ok(batch) => {
                let mut run = RunExecution::new(run_id, batch.decimals);
                self.process(&mut run, batch.payouts).await;
                Ok(run)
            }
            Err(e) => {
                let mut run = RunExecution::new(run_id, 0);
                let message = format!("could not load payout instructions: {e}");
                error!(run_id, error = %e, "run aborted before any payout");
                run.finish(RunStatus::Failed, Some(message));
                if let Err(e) = self.ctx.store.save_run(&run).await {
                    warn!(run_id, error = %e, "failed to persist aborted run");
                }
                Ok(run)
            }
        }
    }

    async fn process(&self, run: &mut RunExecution, instructions: Vec<PayoutInstruction>) {
        run.status = RunStatus::Running;

        let mut work = Vec::new();
        for instruction in instructions.into_iter().filter(|i| i.eligible) {
            if let Err(e) = validate_address(&instruction.recipient) {
                warn!(
                    run_id = %run.run_id,
                    contributor_id = %instruction.contributor_id,
                    error = %e,
                    "skipping payout with invalid recipient"
                );
                run.skipped.push(SkippedPayout {
                    contributor_id: instruction.contributor_id,
                    reason: e.to_string(),
                });
                continue;
            }
            if run.payout(&instruction.contributor_id).is_some() {
                warn!(
                    run_id = %run.run_id,
                    contributor_id = %instruction.contributor_id,
                    "skipping duplicate payout instruction"
                );
                run.skipped.push(SkippedPayout {
                    contributor_id: instruction.contributor_id,
                    reason: "duplicate instruction for contributor".into(),
                });
                continue;
            }
            let payout = PayoutExecution::new(&run.run_id, &instruction);
            run.fold(payout.clone());
            work.push((instruction, payout));
        }
        run.total_payouts = work.len() as u32;
        info!(
            run_id = %run.run_id,
            total = run.total_payouts,
            skipped = run.skipped.len(),
            "starting run"
        );
        self.observer.run_started(work.len());

        if let Err(e) = self.ctx.store.save_run(run).await {
            self.abort(run, e);
            return;
        }

        let pass = RunPass::new(&run.run_id);
        if let Err(e) = self.run_batches(&pass, run, work).await {
            self.abort(run, e);
            return;
        }

        self.complete(run).await;
    }

    /// Execute `work` batch by batch. Each batch is a barrier: the next one
    /// starts only after every payout in it has settled.
    async fn run_batches(
        &self,
        pass: &RunPass,
        run: &mut RunExecution,
        work: Vec<(PayoutInstruction, PayoutExecution)>,
    ) -> Result<(), StoreError> {
        let batch_size = self.ctx.config.batch_size.max(1);
        let batches = work.len().div_ceil(batch_size);

        for (index, chunk) in work.chunks(batch_size).enumerate() {
            if index > 0 {
                sleep(self.ctx.config.batch_delay()).await;
            }
            info!(run_id = %run.run_id, batch = index + 1, batches, size = chunk.len(), "starting batch");
            self.observer.batch_started(index, batches, chunk.len());

            let settled = join_all(
                chunk
                    .iter()
                    .map(|(instruction, payout)| self.runner.run(pass, instruction, payout.clone())),
            )
            .await;

            for payout in settled {
                if let Err(e) = self.ctx.store.record_payout(&payout).await {
                    warn!(payout_id = %payout.payout_id, error = %e, "failed to record payout update");
                }
                self.observer.payout_settled(&payout);
                run.fold(payout);
            }
            self.ctx.store.save_run(run).await?;
        }
        Ok(())
    }

    fn abort(&self, run: &mut RunExecution, cause: StoreError) {
        error!(run_id = %run.run_id, error = %cause, "run aborted");
        run.finish(RunStatus::Failed, Some(format!("run aborted: {cause}")));
    }

    async fn complete(&self, run: &mut RunExecution) {
        let never_ran = run
            .payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Pending)
            .count();
        if never_ran > 0 {
            warn!(run_id = %run.run_id, never_ran, "run ended with payouts that never ran");
            run.finish(
                RunStatus::Failed,
                Some(format!("{never_ran} payouts never ran; retry the run to resume them")),
            );
        } else {
            run.finish(RunStatus::Completed, None);
        }

        match self.ctx.artifacts.generate(run).await {
            Ok(refs) => run.artifacts = refs,
            Err(e) => warn!(run_id = %run.run_id, error = %e, "artifact generation failed"),
        }

        if let Err(e) = self.ctx.store.save_run(run).await {
            self.abort(run, e);
            return;
        }

        info!(
            run_id = %run.run_id,
            total = run.total_payouts,
            confirmed = run.successful_payouts,
            failed = run.failed_payouts,
            unconfirmed = run.submitted_payouts,
            status = %run.status,
            "run finished"
        );
    }

    /// Re-run the FAILED payouts of a stored run, with freshly loaded amounts
    /// and recipients. A run that did not complete (aborted or interrupted) also
    /// resumes its PENDING payouts. CONFIRMED and SUBMITTED payouts are left alone.
    pub async fn retry_failed_payouts(&self, run_id: &str) -> Result<RunExecution, EngineError> {
        let _guard = self.claim(run_id)?;
        let mut run = self
            .ctx
            .store
            .load_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        let fresh = self.ctx.store.load_instructions(run_id).await?;

        let resume = run.status != RunStatus::Completed;
        let mut work = Vec::new();
        let candidates = run.payouts.iter().filter(|p| {
            p.status == PayoutStatus::Failed || (resume && p.status == PayoutStatus::Pending)
        });
        for payout in candidates {
            let instruction = fresh
                .payouts
                .iter()
                .find(|i| i.contributor_id == payout.contributor_id && i.eligible);
            match instruction {
                Some(instruction) => work.push((instruction.clone(), payout.clone())),
                None => warn!(
                    run_id,
                    contributor_id = %payout.contributor_id,
                    "payout no longer has an eligible instruction, leaving it"
                ),
            }
        }

        if work.is_empty() && !resume {
            info!(run_id, "no failed payouts to retry");
            return Ok(run);
        }

        info!(run_id, retrying = work.len(), resume, "retrying payouts");
        self.observer.run_started(work.len());
        run.status = RunStatus::Running;
        run.error = None;
        let pass = RunPass::new(run_id);
        if let Err(e) = self.run_batches(&pass, &mut run, work).await {
            self.abort(&mut run, e);
            return Ok(run);
        }
        self.complete(&mut run).await;
        Ok(run)
    }
}
