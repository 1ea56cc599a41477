use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::LedgerError;

/// Body of `GET /api/v1/transactions/{id}` on the mirror node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTransactionsResponse {
    #[serde(default)]
    pub transactions: Vec<MirrorTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTransaction {
    pub transaction_id: String,
    pub result: String,
    /// `seconds.nanos` as a string.
    pub consensus_timestamp: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub transfers: Vec<MirrorTransfer>,
    #[serde(default)]
    pub token_transfers: Vec<MirrorTokenTransfer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTransfer {
    pub account: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorTokenTransfer {
    pub token_id: String,
    pub account: String,
    pub amount: i64,
}

/// What the mirror node currently knows about a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finality {
    Confirmed { consensus_at: DateTime<Utc> },
    /// Reached consensus with a non-success result; nothing was credited.
    Failed { result: String },
    /// Not visible yet. The mirror lags consensus by a few seconds.
    Pending,
}

/// Result of waiting for a transaction to finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityOutcome {
    Confirmed { consensus_at: DateTime<Utc> },
    Failed { result: String },
    TimedOut { polls: u32 },
}

impl MirrorTransaction {
    pub fn finality(&self) -> Result<Finality, LedgerError> {
        if self.result == "SUCCESS" {
            Ok(Finality::Confirmed {
                consensus_at: parse_consensus_timestamp(&self.consensus_timestamp)?,
            })
        } else {
            Ok(Finality::Failed {
                result: self.result.clone(),
            })
        }
    }
}

pub fn parse_consensus_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    let bad = || LedgerError::Parse(format!("invalid consensus timestamp {raw:?}"));
    let (secs, nanos) = raw.split_once('.').unwrap_or((raw, "0"));
    let secs: i64 = secs.parse().map_err(|_| bad())?;
    let nanos: u32 = nanos.parse().map_err(|_| bad())?;
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(bad)
}
