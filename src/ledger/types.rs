//! Data types for transfers submitted to the ledger gateway.
//!
//! [`TransferRequest`] is the engine-side description of one payout transfer,
//! [`TransferReceipt`] is what the gateway hands back on acceptance, and
//! [`TransferResult`] is the flattened record kept on a payout. The `*Body`
//! structs mirror the gateway's JSON format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::address::AccountId;
use super::error::LedgerError;

/// Symbol used for the network's native asset on the wire.
pub const NATIVE_SYMBOL: &str = "HBAR";

/// The asset a payout is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Asset {
    Native,
    Token { token_id: AccountId },
}

impl Asset {
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => f.write_str(NATIVE_SYMBOL),
            Asset::Token { token_id } => write!(f, "{token_id}"),
        }
    }
}

impl FromStr for Asset {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(NATIVE_SYMBOL) {
            return Ok(Asset::Native);
        }
        let token_id = s
            .parse::<AccountId>()
            .map_err(|_| LedgerError::Parse(format!("unknown asset {s:?}")))?;
        Ok(Asset::Token { token_id })
    }
}

impl TryFrom<String> for Asset {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.to_string()
    }
}

/// A ledger transaction identifier: `{payer}@{seconds}.{nanos}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId {
    pub payer: AccountId,
    pub seconds: i64,
    pub nanos: u32,
}

impl TransactionId {
    /// Derive the transaction id for a transfer.
    ///
    /// The seconds come from `valid_start` and the nanos from a hash of the
    /// idempotency key, so the same payout in the same pass always maps to the
    /// same identifier and the ledger can reject a resubmission as a duplicate.
    pub fn derive(payer: AccountId, valid_start: DateTime<Utc>, idempotency_key: &str) -> Self {
        let digest = Sha256::digest(idempotency_key.as_bytes());
        let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self {
            payer,
            seconds: valid_start.timestamp(),
            nanos: raw % 1_000_000_000,
        }
    }

    /// The `{payer}-{seconds}-{nanos}` form used by the mirror node REST API.
    pub fn mirror_form(&self) -> String {
        format!("{}-{}-{:09}", self.payer, self.seconds, self.nanos)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{:09}", self.payer, self.seconds, self.nanos)
    }
}

impl FromStr for TransactionId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LedgerError::Parse(format!("invalid transaction id {s:?}"));
        let (payer, start) = s.split_once('@').ok_or_else(bad)?;
        let (seconds, nanos) = start.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            payer: payer.parse().map_err(|_| bad())?,
            seconds: seconds.parse().map_err(|_| bad())?,
            nanos: nanos.parse().map_err(|_| bad())?,
        })
    }
}

impl TryFrom<String> for TransactionId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.to_string()
    }
}

/// One transfer from the operator account to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient: String,
    /// Amount in the asset's smallest unit.
    pub amount: u64,
    pub asset: Asset,
    pub memo: Option<String>,
    pub idempotency_key: String,
    /// Start of the validity window for the derived transaction id.
    pub valid_start: DateTime<Utc>,
}

/// What the gateway returns once it has accepted a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub status: String,
    /// Present only for scheduled transfers.
    pub schedule_id: Option<String>,
}

/// Flattened outcome of a single submission, kept on the payout record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    /// Present iff the submission was accepted.
    pub transaction_id: Option<TransactionId>,
    pub status: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransferResult {
    pub fn from_outcome(outcome: &Result<TransferReceipt, LedgerError>) -> Self {
        let timestamp = Utc::now();
        match outcome {
            Ok(receipt) => Self {
                success: true,
                transaction_id: Some(receipt.transaction_id),
                status: receipt.status.clone(),
                error: None,
                timestamp,
            },
            Err(e) => Self {
                success: false,
                transaction_id: None,
                status: e.status(),
                error: Some(e.to_string()),
                timestamp,
            },
        }
    }
}

/// JSON body for `POST /api/v1/transfers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBody {
    pub transaction_id: String,
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub idempotency_key: String,
}

/// JSON body for `POST /api/v1/schedules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleBody {
    pub transfer: TransferBody,
    pub required_signers: Vec<String>,
    pub expiration_time: DateTime<Utc>,
}

/// Response from either gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub transaction_id: String,
    pub status: String,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
