use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::models::{EntityKey, ExtractionMode};
use crate::storage::Storage;

/// Records flushed entity keys as completed so later runs skip them
pub struct ProgressRegistrar {
    ledger: Arc<dyn Storage>,
    chunk_size: usize,
}

impl ProgressRegistrar {
    pub fn new(ledger: Arc<dyn Storage>, chunk_size: usize) -> Self {
        Self {
            ledger,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Register `keys` in batched writes of at most `chunk_size` keys. Returns the number registered.
    ///
    /// Only call after the artifact holding these keys was flushed successfully.
    pub async fn record(&self, mode: ExtractionMode, keys: &[EntityKey]) -> Result<usize> {
        let mut seen = HashSet::new();
        let unique: Vec<EntityKey> = keys
            .iter()
            .filter(|key| seen.insert(*key))
            .cloned()
            .collect();

        for chunk in unique.chunks(self.chunk_size) {
            self.ledger.record(mode, chunk).await?;
        }

        if !unique.is_empty() {
            info!("📝 Registered {} {} keys as processed", unique.len(), mode);
        }
        Ok(unique.len())
    }
}
