//! Persistence ports used by the engine and their two implementations.
//!
//! [`PayoutStore`] keeps instructions, run records and the per-payout update
//! log. [`ContributorDirectory`] resolves a contributor to the ledger address
//! that should receive funds. [`InMemoryStore`] backs tests and embedders;
//! [`JsonFileStore`] is what the CLI uses.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::payout::{PayoutBatchFile, PayoutExecution, PayoutInstruction, RunExecution};

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn save_instructions(&self, batch: &PayoutBatchFile) -> Result<(), StoreError>;

    /// Current instructions for a run. Retry passes read amounts and recipients from here.
    async fn load_instructions(&self, run_id: &str) -> Result<PayoutBatchFile, StoreError>;

    async fn save_run(&self, run: &RunExecution) -> Result<(), StoreError>;

    async fn load_run(&self, run_id: &str) -> Result<Option<RunExecution>, StoreError>;

    /// Per-payout status update, keyed by run id and contributor id.
    async fn record_payout(&self, payout: &PayoutExecution) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ContributorDirectory: Send + Sync {
    /// `Ok(None)` when the contributor is unknown or has no address on file.
    async fn recipient_address(&self, contributor_id: &str) -> Result<Option<String>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    instructions: HashMap<String, PayoutBatchFile>,
    runs: HashMap<String, RunExecution>,
    contributors: HashMap<String, String>,
    updates: Vec<PayoutExecution>,
}

/// Process-local store. Cloning runs in and out keeps callers from aliasing state.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".into()))
    }

    pub fn set_recipient(&self, contributor_id: &str, address: &str) -> Result<(), StoreError> {
        self.lock()?
            .contributors
            .insert(contributor_id.to_string(), address.to_string());
        Ok(())
    }

    pub fn remove_contributor(&self, contributor_id: &str) -> Result<(), StoreError> {
        self.lock()?.contributors.remove(contributor_id);
        Ok(())
    }

    /// Seed the directory from the recipients listed in a batch.
    pub fn register_recipients(&self, batch: &PayoutBatchFile) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        for p in &batch.payouts {
            state
                .contributors
                .insert(p.contributor_id.clone(), p.recipient.clone());
        }
        Ok(())
    }

    /// Every payout update recorded so far, oldest first.
    pub fn payout_updates(&self) -> Result<Vec<PayoutExecution>, StoreError> {
        Ok(self.lock()?.updates.clone())
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn save_instructions(&self, batch: &PayoutBatchFile) -> Result<(), StoreError> {
        self.lock()?
            .instructions
            .insert(batch.run_id.clone(), batch.clone());
        Ok(())
    }

    async fn load_instructions(&self, run_id: &str) -> Result<PayoutBatchFile, StoreError> {
        self.lock()?
            .instructions
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("instructions for run {run_id}")))
    }

    async fn save_run(&self, run: &RunExecution) -> Result<(), StoreError> {
        self.lock()?.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunExecution>, StoreError> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    async fn record_payout(&self, payout: &PayoutExecution) -> Result<(), StoreError> {
        self.lock()?.updates.push(payout.clone());
        Ok(())
    }
}

#[async_trait]
impl ContributorDirectory for InMemoryStore {
    async fn recipient_address(&self, contributor_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.contributors.get(contributor_id).cloned())
    }
}

/// Store laid out as JSON files under a data directory:
///
/// ```text
/// {root}/contributors.json
/// {root}/runs/{run_id}.json
/// {root}/runs/{run_id}.instructions.json
/// {root}/runs/{run_id}.payouts.jsonl
/// ```
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.runs_dir().join(format!("{}.json", file_stem(run_id)?)))
    }

    fn instructions_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .runs_dir()
            .join(format!("{}.instructions.json", file_stem(run_id)?)))
    }

    fn updates_path(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .runs_dir()
            .join(format!("{}.payouts.jsonl", file_stem(run_id)?)))
    }

    fn contributors_path(&self) -> PathBuf {
        self.root.join("contributors.json")
    }

    async fn read_contributors(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(read_json(&self.contributors_path())
            .await?
            .unwrap_or_default())
    }

    /// Merge the recipients of a batch into `contributors.json`.
    pub async fn register_recipients(&self, instructions: &[PayoutInstruction]) -> Result<(), StoreError> {
        let mut contributors = self.read_contributors().await?;
        for p in instructions {
            contributors.insert(p.contributor_id.clone(), p.recipient.clone());
        }
        write_json_atomic(&self.contributors_path(), &contributors).await
    }
}

/// Run ids become file names, so keep them to a safe character set.
fn file_stem(run_id: &str) -> Result<&str, StoreError> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if ok {
        Ok(run_id)
    } else {
        Err(StoreError::Unavailable(format!(
            "run id {run_id:?} cannot be used as a file name"
        )))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl PayoutStore for JsonFileStore {
    async fn save_instructions(&self, batch: &PayoutBatchFile) -> Result<(), StoreError> {
        write_json_atomic(&self.instructions_path(&batch.run_id)?, batch).await
    }

    async fn load_instructions(&self, run_id: &str) -> Result<PayoutBatchFile, StoreError> {
        read_json(&self.instructions_path(run_id)?)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("instructions for run {run_id}")))
    }

    async fn save_run(&self, run: &RunExecution) -> Result<(), StoreError> {
        write_json_atomic(&self.run_path(&run.run_id)?, run).await
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunExecution>, StoreError> {
        read_json(&self.run_path(run_id)?).await
    }

    async fn record_payout(&self, payout: &PayoutExecution) -> Result<(), StoreError> {
        let path = self.updates_path(&payout.run_id)?;
        fs::create_dir_all(self.runs_dir()).await?;
        let mut line = serde_json::to_vec(payout)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ContributorDirectory for JsonFileStore {
    async fn recipient_address(&self, contributor_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_contributors().await?.remove(contributor_id))
    }
}
