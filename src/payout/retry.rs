//! Retry coordination shared by every payout attempt: the backoff policy and
//! the deterministic identifiers derived from `(run_id, contributor_id)`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of submission attempts per payout.
    pub max_retries: u32,
    /// Base delay in milliseconds for linear backoff.
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after a failed `attempt` before the next one.
    /// delay = retry_delay_ms * attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.retry_delay_ms.saturating_mul(u64::from(attempt))
    }

    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

fn scoped_name(scope: &str, run_id: &str, contributor_id: &str) -> String {
    // Length prefix keeps ("a:b", "c") and ("a", "b:c") apart.
    format!("{scope}:{}:{run_id}:{contributor_id}", run_id.len())
}

/// Stable identifier of the payout for `contributor_id` within `run_id`.
pub fn payout_id(run_id: &str, contributor_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        scoped_name("payout", run_id, contributor_id).as_bytes(),
    )
    .to_string()
}

/// Idempotency key sent with every submission of the same payout.
///
/// Identical across attempts, so a resubmission after a timeout that the
/// network actually accepted collapses into the original transfer.
pub fn idempotency_key(run_id: &str, contributor_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        scoped_name("transfer", run_id, contributor_id).as_bytes(),
    )
    .simple()
    .to_string()
}
