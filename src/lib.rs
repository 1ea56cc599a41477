//! Batch payout execution against a Hedera-style ledger.
//!
//! A run is a list of payout instructions. The [`orchestrator`] splits it into
//! bounded batches, the [`runner`] drives each payout through submission with
//! bounded retry, and the [`mirror`] verifier waits for consensus finality.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod mirror;
pub mod orchestrator;
pub mod payout;
pub mod runner;
pub mod store;

#[cfg(test)]
mod testing;
