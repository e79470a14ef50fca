use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{timestamp_name, ArtifactStore, Envelope, EnvelopeRef, KeyLedger};
use crate::dedup::{candidate_keys, CompletedKeySet, SortOrder};
use crate::models::{EntityKey, ExtractionMode};

/// JSON artifacts under `<root>/<mode>/<name>.json`, registry under `<root>/process_<mode>/`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn mode_dir(&self, mode: ExtractionMode) -> PathBuf {
        self.root.join(mode.as_str())
    }

    pub fn registry_dir(&self, mode: ExtractionMode) -> PathBuf {
        self.root.join(format!("process_{}", mode.as_str()))
    }

    async fn ensure_dir(dir: &Path) -> Result<()> {
        if tokio::fs::metadata(dir).await.is_ok() {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        info!("📁 Folder {} created", dir.display());
        Ok(())
    }

    /// `.json` stems in `dir`; a missing directory simply has none
    async fn json_stems(dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
        };

        let mut stems = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                // In-progress temp files start with a dot
                if !stem.starts_with('.') {
                    stems.push(stem.to_string());
                }
            }
        }
        Ok(stems)
    }

    async fn read_dir_rows(dir: &Path) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        for stem in Self::json_stems(dir).await? {
            let path = dir.join(format!("{}.json", stem));
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let envelope: Envelope = serde_json::from_slice(&content)
                .with_context(|| format!("corrupt artifact {}", path.display()))?;
            rows.extend(envelope.result);
        }
        Ok(rows)
    }

    /// Write to a hidden temp file, then rename over the target
    async fn write_envelope(dir: &Path, name: &str, rows: &[Value]) -> Result<PathBuf> {
        Self::ensure_dir(dir).await?;
        let body = serde_json::to_vec(&EnvelopeRef { result: rows })?;

        let target = dir.join(format!("{}.json", name));
        let temp = dir.join(format!(".{}.json.tmp", name));
        tokio::fs::write(&temp, &body)
            .await
            .with_context(|| format!("failed to write {}", temp.display()))?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e).with_context(|| format!("failed to move artifact into {}", target.display()));
        }
        Ok(target)
    }
}

#[async_trait]
impl ArtifactStore for FileStore {
    async fn ensure_location(&self, mode: ExtractionMode) -> Result<()> {
        Self::ensure_dir(&self.mode_dir(mode)).await
    }

    async fn artifact_names(&self, mode: ExtractionMode) -> Result<Vec<String>> {
        Self::json_stems(&self.mode_dir(mode)).await
    }

    async fn read_rows(&self, mode: ExtractionMode) -> Result<Vec<Value>> {
        Self::read_dir_rows(&self.mode_dir(mode)).await
    }

    async fn write_artifact(&self, mode: ExtractionMode, name: &str, rows: &[Value]) -> Result<()> {
        let path = Self::write_envelope(&self.mode_dir(mode), name, rows).await?;
        debug!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyLedger for FileStore {
    async fn candidate_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>> {
        let rows = self.read_rows(ExtractionMode::EarningCalendar).await?;
        Ok(candidate_keys(mode, &rows, order))
    }

    async fn completed_keys(&self, mode: ExtractionMode) -> Result<CompletedKeySet> {
        let mut completed = CompletedKeySet::from_rows(mode, &self.read_rows(mode).await?);
        let registry = Self::read_dir_rows(&self.registry_dir(mode)).await?;
        completed.extend(registry.iter().filter_map(|row| EntityKey::from_row(mode, row)));
        Ok(completed)
    }

    async fn record(&self, mode: ExtractionMode, keys: &[EntityKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let rows: Vec<Value> = keys.iter().map(EntityKey::to_row).collect();
        Self::write_envelope(&self.registry_dir(mode), &timestamp_name(), &rows).await?;
        Ok(())
    }
}
