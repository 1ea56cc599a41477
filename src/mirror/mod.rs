pub mod types;
pub mod verifier;

pub use types::{Finality, FinalityOutcome};
pub use verifier::{ConfirmationVerifier, MirrorVerifier};
