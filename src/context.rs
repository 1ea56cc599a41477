use std::path::Path;
use std::sync::Arc;

use crate::artifacts::{ArtifactGenerator, LocalArtifactStore};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ledger::{HttpLedgerClient, TransferClient};
use crate::mirror::{ConfirmationVerifier, MirrorVerifier};
use crate::store::{ContributorDirectory, JsonFileStore, PayoutStore};

/// Everything the engine talks to, built once per process and passed down.
pub struct EngineContext {
    pub config: EngineConfig,
    pub transfers: Arc<dyn TransferClient>,
    pub verifier: Arc<dyn ConfirmationVerifier>,
    pub directory: Arc<dyn ContributorDirectory>,
    pub store: Arc<dyn PayoutStore>,
    pub artifacts: Arc<dyn ArtifactGenerator>,
}

impl EngineContext {
    /// Wire the HTTP ledger and mirror clients to a JSON store under `data_dir`.
    pub fn from_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let operator = config.operator_account_id()?;

        let transfers = HttpLedgerClient::new(
            config.ledger_url.clone(),
            operator,
            config.operator_key.clone(),
            config.request_timeout(),
        )?;
        let verifier = MirrorVerifier::new(config.mirror_url.clone(), config.request_timeout())?;

        let data_dir = Path::new(&config.data_dir);
        let store = Arc::new(JsonFileStore::new(data_dir));

        Ok(Self {
            transfers: Arc::new(transfers),
            verifier: Arc::new(verifier),
            directory: store.clone(),
            store,
            artifacts: Arc::new(LocalArtifactStore::new(data_dir)),
            config,
        })
    }
}
