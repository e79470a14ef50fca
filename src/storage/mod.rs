//! Storage backends: where artifacts land and where completed keys are recorded.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::database::CatalogStore;
use crate::dedup::{CompletedKeySet, DedupFilter, SortOrder};
use crate::models::{Config, EntityKey, ExtractionMode, StorageBackend};

pub mod file_store;
pub use file_store::FileStore;

/// On-disk body of every artifact: `{"result": [...]}`
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub result: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeRef<'a> {
    pub result: &'a [Value],
}

/// Durable home of extracted artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the location for `mode` if absent. Creating an existing location is a no-op.
    async fn ensure_location(&self, mode: ExtractionMode) -> Result<()>;

    /// Identifiers of every persisted artifact of `mode`, unordered
    async fn artifact_names(&self, mode: ExtractionMode) -> Result<Vec<String>>;

    /// Every row persisted for `mode`, duplicates included
    async fn read_rows(&self, mode: ExtractionMode) -> Result<Vec<Value>>;

    /// Persist `rows` as one artifact named `name`. Either all rows land or none do.
    async fn write_artifact(&self, mode: ExtractionMode, name: &str, rows: &[Value]) -> Result<()>;
}

/// Durable record of processed entity keys
#[async_trait]
pub trait KeyLedger: Send + Sync {
    /// Distinct keys `mode` could extract, taken from the earning calendar output
    async fn candidate_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>>;

    /// Keys present in the curated output or the in-progress registry
    async fn completed_keys(&self, mode: ExtractionMode) -> Result<CompletedKeySet>;

    /// Candidates not yet completed
    async fn pending_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>> {
        let candidates = self.candidate_keys(mode, order).await?;
        let completed = self.completed_keys(mode).await?;
        Ok(DedupFilter::filter(candidates, &completed))
    }

    /// Append `keys` to the registry in one batched write
    async fn record(&self, mode: ExtractionMode, keys: &[EntityKey]) -> Result<()>;
}

/// A backend that is both artifact store and key ledger
pub trait Storage: ArtifactStore + KeyLedger {}

impl<T: ArtifactStore + KeyLedger> Storage for T {}

/// Open the backend selected by `config`
pub async fn open(config: &Config) -> Result<Arc<dyn Storage>> {
    match config.storage_backend {
        StorageBackend::File => Ok(Arc::new(FileStore::new(&config.storage_root))),
        StorageBackend::Catalog => Ok(Arc::new(CatalogStore::new(&config.database_path).await?)),
    }
}

static NAME_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique, lexicographically increasing artifact name derived from the current time
pub fn timestamp_name() -> String {
    let sequence = NAME_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{}{:04}", Utc::now().format("%Y%m%d%H%M%S%6f"), sequence)
}
