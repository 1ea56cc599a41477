pub mod address;
pub mod client;
pub mod error;
pub mod types;

pub use address::{AccountId, validate_address};
pub use client::{HttpLedgerClient, TransferClient};
pub use error::LedgerError;
pub use types::{Asset, TransactionId, TransferReceipt, TransferRequest, TransferResult};
