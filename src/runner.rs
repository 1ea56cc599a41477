use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::context::EngineContext;
use crate::error::FailureKind;
use crate::ledger::{TransferClient, TransferReceipt, TransferRequest, TransferResult, validate_address};
use crate::mirror::{ConfirmationVerifier, FinalityOutcome};
use crate::payout::{
    AttemptOutcome, AttemptRecord, PayoutExecution, PayoutInstruction, PayoutStatus, RetryPolicy,
    idempotency_key,
};
use crate::store::ContributorDirectory;

/// Memo length accepted by the ledger, in bytes.
const MAX_MEMO_BYTES: usize = 100;

/// Ceiling on a server-requested wait before the next attempt.
const MAX_RATE_LIMIT_WAIT_MS: u64 = 60_000;

/// Status string recorded for a transfer parked behind a schedule.
pub const SCHEDULED_STATUS: &str = "SCHEDULED";

/// Identifies one execution pass over a run.
///
/// `valid_start` anchors the transaction ids of the pass: every attempt of a
/// payout within the pass derives the same id from it.
#[derive(Debug, Clone)]
pub struct RunPass {
    pub run_id: String,
    pub valid_start: DateTime<Utc>,
}

impl RunPass {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            valid_start: Utc::now(),
        }
    }
}

/// Runs one payout to a terminal (or submitted-unconfirmed) state with bounded retry.
pub struct AttemptRunner {
    transfers: Arc<dyn TransferClient>,
    verifier: Arc<dyn ConfirmationVerifier>,
    directory: Arc<dyn ContributorDirectory>,
    policy: RetryPolicy,
    poll_interval: Duration,
    max_polls: u32,
    memo_prefix: String,
    schedule: Option<ScheduleConfig>,
}

/// Why a single attempt did not reach the ledger's acceptance.
struct AttemptFailure {
    kind: FailureKind,
    /// Minimum wait the ledger asked for, when it rate limited us.
    retry_after_ms: Option<u64>,
}

impl From<FailureKind> for AttemptFailure {
    fn from(kind: FailureKind) -> Self {
        Self {
            kind,
            retry_after_ms: None,
        }
    }
}

fn advance(payout: &mut PayoutExecution, next: PayoutStatus) {
    if let Err(e) = payout.transition(next) {
        error!(payout_id = %payout.payout_id, error = %e, "state machine refused transition");
    }
}

fn fail(payout: &mut PayoutExecution, reason: String) {
    if let Err(e) = payout.fail(reason) {
        error!(payout_id = %payout.payout_id, error = %e, "state machine refused failure");
    }
}

fn memo(prefix: &str, run_id: &str, contributor_id: &str) -> String {
    let mut memo = format!("{prefix}:{run_id}:{contributor_id}");
    if memo.len() > MAX_MEMO_BYTES {
        let mut cut = MAX_MEMO_BYTES;
        while !memo.is_char_boundary(cut) {
            cut -= 1;
        }
        memo.truncate(cut);
    }
    memo
}

impl AttemptRunner {
    pub fn from_context(ctx: &EngineContext) -> Self {
        Self {
            transfers: Arc::clone(&ctx.transfers),
            verifier: Arc::clone(&ctx.verifier),
            directory: Arc::clone(&ctx.directory),
            policy: ctx.config.retry_policy(),
            poll_interval: ctx.config.poll_interval(),
            max_polls: ctx.config.max_polls,
            memo_prefix: ctx.config.memo_prefix.clone(),
            schedule: ctx.config.schedule.clone(),
        }
    }

    /// Execute `payout` end to end.
    ///
    /// Never returns an error: every failure ends up in the payout's state.
    /// A FAILED payout is reopened first; attempt counts keep accumulating.
    pub async fn run(
        &self,
        pass: &RunPass,
        instruction: &PayoutInstruction,
        mut payout: PayoutExecution,
    ) -> PayoutExecution {
        if payout.status == PayoutStatus::Failed {
            advance(&mut payout, PayoutStatus::Pending);
        }
        if payout.status != PayoutStatus::Pending {
            warn!(payout_id = %payout.payout_id, status = %payout.status, "payout is not pending, leaving it alone");
            return payout;
        }
        payout.amount = instruction.amount;
        payout.asset = instruction.asset.clone();

        for attempt in 1..=self.policy.max_retries {
            payout.attempt_count += 1;
            let started_at = Utc::now();

            match self.attempt_once(pass, instruction, &mut payout).await {
                Ok(receipt) => {
                    payout.attempts.push(AttemptRecord {
                        attempt: payout.attempt_count,
                        started_at,
                        outcome: AttemptOutcome::Accepted,
                        error: None,
                        backoff_ms: None,
                    });
                    self.settle(&mut payout, receipt).await;
                    return payout;
                }
                Err(AttemptFailure {
                    kind: FailureKind::Data(reason),
                    ..
                }) => {
                    warn!(payout_id = %payout.payout_id, contributor_id = %payout.contributor_id, %reason, "payout data error, not retrying");
                    payout.attempts.push(AttemptRecord {
                        attempt: payout.attempt_count,
                        started_at,
                        outcome: AttemptOutcome::DataError,
                        error: Some(reason.clone()),
                        backoff_ms: None,
                    });
                    fail(&mut payout, reason);
                    return payout;
                }
                Err(AttemptFailure {
                    kind: FailureKind::Transient(reason),
                    retry_after_ms,
                }) => {
                    let last = self.policy.is_last_attempt(attempt);
                    let floor = retry_after_ms.unwrap_or(0).min(MAX_RATE_LIMIT_WAIT_MS);
                    let backoff_ms =
                        (!last).then(|| self.policy.delay_for_attempt(attempt).max(floor));
                    payout.attempts.push(AttemptRecord {
                        attempt: payout.attempt_count,
                        started_at,
                        outcome: AttemptOutcome::Transient,
                        error: Some(reason.clone()),
                        backoff_ms,
                    });
                    payout.last_error = Some(reason.clone());

                    match backoff_ms {
                        None => {
                            warn!(payout_id = %payout.payout_id, attempt, %reason, "retries exhausted");
                            fail(&mut payout, reason);
                            return payout;
                        }
                        Some(delay_ms) => {
                            info!(
                                payout_id = %payout.payout_id,
                                attempt,
                                max = self.policy.max_retries,
                                delay_ms,
                                %reason,
                                "submission failed, retrying"
                            );
                            sleep(Duration::from_millis(delay_ms)).await;
                        }
                    }
                }
            }
        }

        fail(&mut payout, "max retries exceeded".to_string());
        payout
    }

    /// Resolve the recipient and make a single submission.
    async fn attempt_once(
        &self,
        pass: &RunPass,
        instruction: &PayoutInstruction,
        payout: &mut PayoutExecution,
    ) -> Result<TransferReceipt, AttemptFailure> {
        let recipient = self
            .resolve_recipient(&instruction.contributor_id)
            .await
            .map_err(AttemptFailure::from)?;
        payout.recipient = Some(recipient.clone());

        let request = TransferRequest {
            recipient,
            amount: instruction.amount,
            asset: instruction.asset.clone(),
            memo: Some(memo(&self.memo_prefix, &pass.run_id, &instruction.contributor_id)),
            idempotency_key: idempotency_key(&pass.run_id, &instruction.contributor_id),
            valid_start: pass.valid_start,
        };

        let scheduled = self
            .schedule
            .as_ref()
            .filter(|s| s.applies_to(instruction.amount));

        let outcome = match scheduled {
            Some(schedule) => {
                // Capped at a year so the addition cannot overflow.
                let secs = schedule.expiration_secs.min(31_536_000) as i64;
                let expiration = Utc::now() + chrono::Duration::seconds(secs);
                self.transfers
                    .submit_scheduled_transfer(&request, &schedule.required_signers, expiration)
                    .await
            }
            None => self.transfers.submit_transfer(&request).await,
        };

        let mut result = TransferResult::from_outcome(&outcome);
        if scheduled.is_some() && result.success {
            result.status = SCHEDULED_STATUS.to_string();
        }
        payout.last_result = Some(result);

        outcome.map_err(|e| AttemptFailure {
            kind: e.failure_kind(),
            retry_after_ms: e.retry_after_ms(),
        })
    }

    async fn resolve_recipient(&self, contributor_id: &str) -> Result<String, FailureKind> {
        let address = self
            .directory
            .recipient_address(contributor_id)
            .await
            .map_err(|e| FailureKind::Transient(format!("contributor lookup failed: {e}")))?
            .ok_or_else(|| {
                FailureKind::Data(format!("contributor {contributor_id} has no recipient address"))
            })?;
        validate_address(&address)
            .map(|id| id.to_string())
            .map_err(|e| FailureKind::Data(e.to_string()))
    }

    /// Move an accepted payout to SUBMITTED and wait for finality. Never resubmits.
    async fn settle(&self, payout: &mut PayoutExecution, receipt: TransferReceipt) {
        let transaction_id = receipt.transaction_id;
        payout.transaction_id = Some(transaction_id);
        payout.schedule_id = receipt.schedule_id.clone();
        payout.last_error = None;
        advance(payout, PayoutStatus::Submitted);

        if receipt.schedule_id.is_some() {
            info!(payout_id = %payout.payout_id, %transaction_id, "scheduled transfer awaiting signatures");
            return;
        }

        debug!(payout_id = %payout.payout_id, %transaction_id, "awaiting finality");
        match self
            .verifier
            .await_finalization(&transaction_id, self.poll_interval, self.max_polls)
            .await
        {
            FinalityOutcome::Confirmed { consensus_at } => {
                payout.confirmed_at = Some(consensus_at);
                advance(payout, PayoutStatus::Confirmed);
                info!(payout_id = %payout.payout_id, %transaction_id, "payout confirmed");
            }
            FinalityOutcome::Failed { result } => {
                warn!(payout_id = %payout.payout_id, %transaction_id, %result, "transaction failed at consensus");
                fail(payout, format!("transaction {transaction_id} failed at consensus: {result}"));
            }
            FinalityOutcome::TimedOut { polls } => {
                warn!(
                    payout_id = %payout.payout_id,
                    %transaction_id,
                    polls,
                    "finality not observed, leaving payout submitted for reconciliation"
                );
            }
        }
    }
}
