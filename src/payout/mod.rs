mod model;
mod retry;

pub use model::{
    ArtifactRefs, AttemptOutcome, AttemptRecord, InvalidTransition, PayoutBatchFile,
    PayoutExecution, PayoutInstruction, PayoutStatus, RunExecution, RunStatus, RunSummary,
    SkippedPayout, format_amount,
};
pub use retry::{RetryPolicy, idempotency_key, payout_id};
