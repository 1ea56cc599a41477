use thiserror::Error;

pub use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Run {0} is already executing")]
    RunInProgress(String),

    #[error("Run {0} already exists; use `retry` to rerun its failed payouts")]
    RunExists(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures of the persistence and artifact collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Classifies a payout failure for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Bad payout data (missing or malformed address, unknown contributor). Never retried.
    Data(String),
    /// Network or node trouble. Retried with backoff.
    Transient(String),
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FailureKind::Data(msg) | FailureKind::Transient(msg) => msg,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Data(msg) => write!(f, "Data error: {msg}"),
            FailureKind::Transient(msg) => write!(f, "Transient error: {msg}"),
        }
    }
}
