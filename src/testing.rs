//! Test doubles for the ledger and mirror boundaries. Test builds only.
//!
//! [`FakeLedger`] deduplicates by idempotency key the way the real network
//! does and can be scripted per contributor. [`FakeVerifier`] answers finality
//! queries from a fixed mode. Both write to a shared [`EventLog`] so tests can
//! check ordering across batches.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::artifacts::ArtifactGenerator;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::StoreError;
use crate::ledger::{AccountId, LedgerError, TransactionId, TransferClient, TransferReceipt, TransferRequest};
use crate::mirror::{ConfirmationVerifier, Finality};
use crate::payout::{ArtifactRefs, PayoutBatchFile, PayoutExecution, RunExecution};
use crate::store::{InMemoryStore, PayoutStore};

pub const OPERATOR: AccountId = AccountId {
    shard: 0,
    realm: 0,
    num: 2,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Submitted(String),
    Finalized(String),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
    owners: Mutex<HashMap<TransactionId, String>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn owner(&self, tx: &TransactionId) -> Option<String> {
        self.owners.lock().unwrap().get(tx).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Transfer,
    Scheduled { signers: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub contributor: String,
    pub request: TransferRequest,
    pub kind: CallKind,
}

#[derive(Default)]
struct LedgerState {
    scripts: HashMap<String, VecDeque<LedgerError>>,
    always_fail: HashSet<String>,
    calls: Vec<RecordedCall>,
    credits: HashMap<String, TransferReceipt>,
}

/// In-process stand-in for the ledger gateway.
pub struct FakeLedger {
    state: Mutex<LedgerState>,
    log: Arc<EventLog>,
}

/// Contributor id is the last memo segment (`payout:{run}:{contributor}`).
fn contributor_of(request: &TransferRequest) -> String {
    request
        .memo
        .as_deref()
        .and_then(|m| m.rsplit(':').next())
        .unwrap_or_default()
        .to_string()
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::with_log(Arc::new(EventLog::default()))
    }

    pub fn with_log(log: Arc<EventLog>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            log,
        }
    }

    pub fn log(&self) -> Arc<EventLog> {
        Arc::clone(&self.log)
    }

    /// Queue errors returned before submissions for `contributor` start succeeding.
    pub fn script(&self, contributor: &str, outcomes: Vec<LedgerError>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(contributor.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn fail_always(&self, contributor: &str) {
        self.state
            .lock()
            .unwrap()
            .always_fail
            .insert(contributor.to_string());
    }

    pub fn heal(&self, contributor: &str) {
        let mut state = self.state.lock().unwrap();
        state.always_fail.remove(contributor);
        state.scripts.remove(contributor);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, contributor: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.contributor == contributor)
            .collect()
    }

    /// Distinct transfers the ledger has credited.
    pub fn credits(&self) -> usize {
        self.state.lock().unwrap().credits.len()
    }

    fn submit(&self, request: &TransferRequest, kind: CallKind) -> Result<TransferReceipt, LedgerError> {
        let contributor = contributor_of(request);
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            contributor: contributor.clone(),
            request: request.clone(),
            kind: kind.clone(),
        });
        self.log.push(Event::Submitted(contributor.clone()));

        if state.always_fail.contains(&contributor) {
            return Err(LedgerError::Rejected {
                status: "BUSY".into(),
                message: format!("scripted permanent failure for {contributor}"),
            });
        }
        if let Some(e) = state
            .scripts
            .get_mut(&contributor)
            .and_then(|q| q.pop_front())
        {
            return Err(e);
        }

        if let Some(existing) = state.credits.get(&request.idempotency_key) {
            return Ok(TransferReceipt {
                status: "DUPLICATE_TRANSACTION".into(),
                ..existing.clone()
            });
        }

        let transaction_id =
            TransactionId::derive(OPERATOR, request.valid_start, &request.idempotency_key);
        let receipt = TransferReceipt {
            transaction_id,
            status: "SUCCESS".into(),
            schedule_id: matches!(kind, CallKind::Scheduled { .. }).then(|| "0.0.9999".to_string()),
        };
        state
            .credits
            .insert(request.idempotency_key.clone(), receipt.clone());
        self.log
            .owners
            .lock()
            .unwrap()
            .insert(transaction_id, contributor);
        Ok(receipt)
    }
}

#[async_trait]
impl TransferClient for FakeLedger {
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        self.submit(request, CallKind::Transfer)
    }

    async fn submit_scheduled_transfer(
        &self,
        request: &TransferRequest,
        required_signers: &[String],
        _expiration: DateTime<Utc>,
    ) -> Result<TransferReceipt, LedgerError> {
        self.submit(
            request,
            CallKind::Scheduled {
                signers: required_signers.to_vec(),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierMode {
    Confirm,
    NeverFinal,
    Fail(String),
}

/// In-process stand-in for the mirror node.
pub struct FakeVerifier {
    mode: VerifierMode,
    overrides: Mutex<HashMap<String, VerifierMode>>,
    polls: AtomicU32,
    log: Arc<EventLog>,
}

impl FakeVerifier {
    fn with_mode(mode: VerifierMode) -> Self {
        Self {
            mode,
            overrides: Mutex::new(HashMap::new()),
            polls: AtomicU32::new(0),
            log: Arc::new(EventLog::default()),
        }
    }

    pub fn confirming() -> Self {
        Self::with_mode(VerifierMode::Confirm)
    }

    pub fn never_final() -> Self {
        Self::with_mode(VerifierMode::NeverFinal)
    }

    pub fn failing(result: &str) -> Self {
        Self::with_mode(VerifierMode::Fail(result.to_string()))
    }

    /// Share the ledger's log so finality can be traced back to contributors.
    pub fn sharing(mut self, log: Arc<EventLog>) -> Self {
        self.log = log;
        self
    }

    pub fn set_mode_for(&self, contributor: &str, mode: VerifierMode) {
        self.overrides
            .lock()
            .unwrap()
            .insert(contributor.to_string(), mode);
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationVerifier for FakeVerifier {
    async fn check(&self, transaction_id: &TransactionId) -> Result<Finality, LedgerError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let owner = self.log.owner(transaction_id);
        let mode = owner
            .as_ref()
            .and_then(|c| self.overrides.lock().unwrap().get(c).cloned())
            .unwrap_or_else(|| self.mode.clone());

        let finality = match mode {
            VerifierMode::Confirm => Finality::Confirmed {
                consensus_at: Utc::now(),
            },
            VerifierMode::NeverFinal => Finality::Pending,
            VerifierMode::Fail(result) => Finality::Failed { result },
        };
        if finality != Finality::Pending
            && let Some(contributor) = owner
        {
            self.log.push(Event::Finalized(contributor));
        }
        Ok(finality)
    }
}

/// Artifact generator that returns fixed content ids and counts invocations.
#[derive(Default)]
pub struct RecordingArtifacts {
    pub generated: AtomicU32,
}

#[async_trait]
impl ArtifactGenerator for RecordingArtifacts {
    async fn generate(&self, run: &RunExecution) -> Result<ArtifactRefs, StoreError> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(ArtifactRefs {
            report_cid: Some(format!("test-report-{}", run.run_id)),
            summary_cid: Some(format!("test-summary-{}", run.run_id)),
        })
    }
}

/// Store whose run writes fail once `fail_after` saves have succeeded,
/// until [`recover`](FlakyStore::recover) is called.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_after: u32,
    saves: AtomicU32,
    recovered: AtomicBool,
}

impl FlakyStore {
    pub fn new(fail_after: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_after,
            saves: AtomicU32::new(0),
            recovered: AtomicBool::new(false),
        }
    }

    pub fn recover(&self) {
        self.recovered.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PayoutStore for FlakyStore {
    async fn save_instructions(&self, batch: &PayoutBatchFile) -> Result<(), StoreError> {
        self.inner.save_instructions(batch).await
    }

    async fn load_instructions(&self, run_id: &str) -> Result<PayoutBatchFile, StoreError> {
        self.inner.load_instructions(run_id).await
    }

    async fn save_run(&self, run: &RunExecution) -> Result<(), StoreError> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.fail_after
            && !self.recovered.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("scripted outage".into()));
        }
        self.inner.save_run(run).await
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunExecution>, StoreError> {
        self.inner.load_run(run_id).await
    }

    async fn record_payout(&self, payout: &PayoutExecution) -> Result<(), StoreError> {
        self.inner.record_payout(payout).await
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        operator_account: OPERATOR.to_string(),
        ..Default::default()
    }
}

/// Context over the fakes with an in-memory store seeded with `contributors`.
pub fn context_with(
    ledger: Arc<FakeLedger>,
    verifier: Arc<FakeVerifier>,
    contributors: &[(&str, &str)],
) -> EngineContext {
    harness(ledger, verifier, contributors).0
}

pub fn harness(
    ledger: Arc<FakeLedger>,
    verifier: Arc<FakeVerifier>,
    contributors: &[(&str, &str)],
) -> (EngineContext, Arc<InMemoryStore>, Arc<RecordingArtifacts>) {
    let store = Arc::new(InMemoryStore::new());
    for (id, address) in contributors {
        store.set_recipient(id, address).unwrap();
    }
    let artifacts = Arc::new(RecordingArtifacts::default());
    let ctx = EngineContext {
        config: test_config(),
        transfers: ledger,
        verifier,
        directory: store.clone(),
        store: store.clone(),
        artifacts: artifacts.clone(),
    };
    (ctx, store, artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Asset;

    fn request(contributor: &str) -> TransferRequest {
        TransferRequest {
            recipient: "0.0.1001".into(),
            amount: 10,
            asset: Asset::Native,
            memo: Some(format!("payout:run-1:{contributor}")),
            idempotency_key: crate::payout::idempotency_key("run-1", contributor),
            valid_start: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fake_ledger_deduplicates_by_idempotency_key() {
        let ledger = FakeLedger::new();
        let req = request("alice");
        let first = ledger.submit_transfer(&req).await.unwrap();
        let second = ledger.submit_transfer(&req).await.unwrap();

        assert_eq!(ledger.credits(), 1);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(second.status, "DUPLICATE_TRANSACTION");
        assert_eq!(ledger.calls().len(), 2);
    }
}
