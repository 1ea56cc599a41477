use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::payout_id;
use crate::ledger::{Asset, TransactionId, TransferResult};

/// One approved payout coming from the distribution calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub contributor_id: String,
    pub recipient: String,
    /// Amount in the asset's smallest unit.
    pub amount: u64,
    pub asset: Asset,
    pub eligible: bool,
}

/// Input file handed over by the distribution calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBatchFile {
    pub run_id: String,
    /// Decimal precision of the run's asset, used only for display.
    #[serde(default)]
    pub decimals: u8,
    pub payouts: Vec<PayoutInstruction>,
}

/// Lifecycle of a single payout.
///
/// PENDING → SUBMITTED → CONFIRMED on the happy path; FAILED is reachable
/// from PENDING and SUBMITTED. A retry pass reopens FAILED → PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "PENDING"),
            PayoutStatus::Submitted => write!(f, "SUBMITTED"),
            PayoutStatus::Confirmed => write!(f, "CONFIRMED"),
            PayoutStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl PayoutStatus {
    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Submitted, Confirmed)
                | (Submitted, Failed)
                | (Failed, Pending)
        )
    }
}

/// Rejected state change. Indicates a bug in the caller, not a ledger problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid payout transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PayoutStatus,
    pub to: PayoutStatus,
}

/// How a single submission attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    /// Retryable failure from the ledger.
    Transient,
    /// Bad payout data; never retried.
    DataError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    /// Wait before the next attempt, if one followed.
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutExecution {
    pub payout_id: String,
    pub run_id: String,
    pub contributor_id: String,
    pub amount: u64,
    pub asset: Asset,
    pub recipient: Option<String>,
    pub status: PayoutStatus,
    pub status_history: Vec<PayoutStatus>,
    pub attempt_count: u32,
    pub attempts: Vec<AttemptRecord>,
    pub last_error: Option<String>,
    pub last_result: Option<TransferResult>,
    pub transaction_id: Option<TransactionId>,
    pub schedule_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutExecution {
    pub fn new(run_id: &str, instruction: &PayoutInstruction) -> Self {
        let now = Utc::now();
        Self {
            payout_id: payout_id(run_id, &instruction.contributor_id),
            run_id: run_id.to_string(),
            contributor_id: instruction.contributor_id.clone(),
            amount: instruction.amount,
            asset: instruction.asset.clone(),
            recipient: None,
            status: PayoutStatus::Pending,
            status_history: Vec::new(),
            attempt_count: 0,
            attempts: Vec::new(),
            last_error: None,
            last_result: None,
            transaction_id: None,
            schedule_id: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: PayoutStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status_history.push(self.status);
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a terminal failure from either PENDING or SUBMITTED.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(PayoutStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn is_final(&self) -> bool {
        matches!(self.status, PayoutStatus::Confirmed | PayoutStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// An eligible instruction left out of the run by validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPayout {
    pub contributor_id: String,
    pub reason: String,
}

/// Content identifiers returned by the artifact generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    pub report_cid: Option<String>,
    pub summary_cid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExecution {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub decimals: u8,
    pub total_payouts: u32,
    pub successful_payouts: u32,
    pub failed_payouts: u32,
    /// Accepted by the ledger but not confirmed within the polling window.
    pub submitted_payouts: u32,
    pub payouts: Vec<PayoutExecution>,
    pub skipped: Vec<SkippedPayout>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub artifacts: ArtifactRefs,
}

impl RunExecution {
    pub fn new(run_id: &str, decimals: u8) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            decimals,
            total_payouts: 0,
            successful_payouts: 0,
            failed_payouts: 0,
            submitted_payouts: 0,
            payouts: Vec::new(),
            skipped: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            artifacts: ArtifactRefs::default(),
        }
    }

    /// Insert or replace a payout by id and refresh the counters.
    pub fn fold(&mut self, payout: PayoutExecution) {
        match self
            .payouts
            .iter_mut()
            .find(|p| p.payout_id == payout.payout_id)
        {
            Some(existing) => *existing = payout,
            None => self.payouts.push(payout),
        }
        self.recount();
    }

    pub fn recount(&mut self) {
        let count = |status| self.payouts.iter().filter(|p| p.status == status).count() as u32;
        self.successful_payouts = count(PayoutStatus::Confirmed);
        self.failed_payouts = count(PayoutStatus::Failed);
        self.submitted_payouts = count(PayoutStatus::Submitted);
    }

    pub fn payout(&self, contributor_id: &str) -> Option<&PayoutExecution> {
        self.payouts
            .iter()
            .find(|p| p.contributor_id == contributor_id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PayoutExecution> {
        self.payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_payouts > 0
    }

    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Compact summary printed by the CLI and embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total_payouts: u32,
    pub successful_payouts: u32,
    pub failed_payouts: u32,
    pub submitted_payouts: u32,
    pub skipped_payouts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_run(run: &RunExecution) -> Self {
        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            total_payouts: run.total_payouts,
            successful_payouts: run.successful_payouts,
            failed_payouts: run.failed_payouts,
            submitted_payouts: run.submitted_payouts,
            skipped_payouts: run.skipped.len() as u32,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_ms: run
                .finished_at
                .map(|end| (end - run.started_at).num_milliseconds()),
            error: run.error.clone(),
        }
    }
}

/// Render a smallest-unit amount with the run's decimal precision.
///
/// Precisions too large for the scale to fit in a `u128` fall back to the raw amount.
pub fn format_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let Some(scale) = 10u128.checked_pow(u32::from(decimals)) else {
        return amount.to_string();
    };
    let whole = u128::from(amount) / scale;
    let frac = u128::from(amount) % scale;
    format!("{whole}.{frac:0width$}", width = decimals as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(contributor: &str) -> PayoutInstruction {
        PayoutInstruction {
            contributor_id: contributor.into(),
            recipient: "0.0.1001".into(),
            amount: 500,
            asset: Asset::Native,
            eligible: true,
        }
    }

    #[test]
    fn payout_creation_defaults() {
        let p = PayoutExecution::new("run-1", &instruction("alice"));
        assert_eq!(p.status, PayoutStatus::Pending);
        assert_eq!(p.attempt_count, 0);
        assert!(p.status_history.is_empty());
        assert_eq!(p.payout_id, payout_id("run-1", "alice"));
    }

    #[test]
    fn happy_path_transitions() {
        let mut p = PayoutExecution::new("run-1", &instruction("alice"));
        p.transition(PayoutStatus::Submitted).unwrap();
        p.transition(PayoutStatus::Confirmed).unwrap();
        assert!(p.is_final());
        assert_eq!(
            p.status_history,
            vec![PayoutStatus::Pending, PayoutStatus::Submitted]
        );
    }

    #[test]
    fn confirmed_is_terminal() {
        let mut p = PayoutExecution::new("run-1", &instruction("alice"));
        p.transition(PayoutStatus::Submitted).unwrap();
        p.transition(PayoutStatus::Confirmed).unwrap();
        for next in [
            PayoutStatus::Pending,
            PayoutStatus::Submitted,
            PayoutStatus::Failed,
        ] {
            assert!(p.transition(next).is_err());
        }
    }

    #[test]
    fn submitted_cannot_reopen() {
        let mut p = PayoutExecution::new("run-1", &instruction("alice"));
        p.transition(PayoutStatus::Submitted).unwrap();
        let err = p.transition(PayoutStatus::Pending).unwrap_err();
        assert_eq!(err.to_string(), "invalid payout transition SUBMITTED -> PENDING");
    }

    #[test]
    fn failed_can_reopen_for_retry() {
        let mut p = PayoutExecution::new("run-1", &instruction("alice"));
        p.fail("boom").unwrap();
        assert_eq!(p.last_error.as_deref(), Some("boom"));
        p.transition(PayoutStatus::Pending).unwrap();
        assert_eq!(p.status, PayoutStatus::Pending);
    }

    #[test]
    fn fold_replaces_and_recounts() {
        let mut run = RunExecution::new("run-1", 8);
        let mut a = PayoutExecution::new("run-1", &instruction("alice"));
        a.fail("down").unwrap();
        let mut b = PayoutExecution::new("run-1", &instruction("bob"));
        b.transition(PayoutStatus::Submitted).unwrap();
        run.fold(a.clone());
        run.fold(b);
        assert_eq!(run.failed_payouts, 1);
        assert_eq!(run.submitted_payouts, 1);
        assert!(run.has_failures());

        a.transition(PayoutStatus::Pending).unwrap();
        a.transition(PayoutStatus::Submitted).unwrap();
        a.transition(PayoutStatus::Confirmed).unwrap();
        run.fold(a);
        assert_eq!(run.payouts.len(), 2);
        assert_eq!(run.failed_payouts, 0);
        assert_eq!(run.successful_payouts, 1);
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&PayoutStatus::Submitted).unwrap(),
            "\"SUBMITTED\""
        );
        assert_eq!(serde_json::to_string(&RunStatus::Completed).unwrap(), "\"COMPLETED\"");
    }

    #[test]
    fn summary_from_run() {
        let mut run = RunExecution::new("run-9", 0);
        run.total_payouts = 2;
        run.skipped.push(SkippedPayout {
            contributor_id: "carol".into(),
            reason: "bad address".into(),
        });
        run.finish(RunStatus::Completed, None);
        let summary = RunSummary::from_run(&run);
        assert_eq!(summary.skipped_payouts, 1);
        assert!(summary.duration_ms.is_some());
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(150_000_000, 8), "1.50000000");
        assert_eq!(format_amount(5, 2), "0.05");
        assert_eq!(format_amount(42, 0), "42");
    }

    #[test]
    fn format_amount_survives_absurd_precision() {
        assert_eq!(format_amount(1, 38), format!("0.{}1", "0".repeat(37)));
        assert_eq!(format_amount(1, 39), "1");
        assert_eq!(format_amount(u64::MAX, u8::MAX), u64::MAX.to_string());
    }

    #[test]
    fn batch_file_parses() {
        let json = r#"{
            "run_id": "2026-10",
            "decimals": 8,
            "payouts": [
                {"contributor_id": "alice", "recipient": "0.0.1001", "amount": 100, "asset": "HBAR", "eligible": true},
                {"contributor_id": "bob", "recipient": "0.0.1002", "amount": 7, "asset": "0.0.456858", "eligible": false}
            ]
        }"#;
        let file: PayoutBatchFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.payouts.len(), 2);
        assert!(!file.payouts[1].asset.is_native());
    }
}
