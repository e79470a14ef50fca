//! Dedup filter over entity keys.
//!
//! A key counts as done when it appears in the curated output or in the in-progress
//! registry. Both storage backends hand their completed keys to the same [`DedupFilter`].

use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{EntityKey, ExtractionMode};

/// Keys durably recorded as processed, successfully or with a placeholder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedKeySet {
    keys: HashSet<EntityKey>,
}

impl CompletedKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys projected from persisted rows; rows without usable key columns are ignored
    pub fn from_rows<'a>(mode: ExtractionMode, rows: impl IntoIterator<Item = &'a Value>) -> Self {
        rows.into_iter()
            .filter_map(|row| EntityKey::from_row(mode, row))
            .collect()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<EntityKey> for CompletedKeySet {
    fn from_iter<I: IntoIterator<Item = EntityKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl Extend<EntityKey> for CompletedKeySet {
    fn extend<I: IntoIterator<Item = EntityKey>>(&mut self, iter: I) {
        self.keys.extend(iter);
    }
}

/// Candidate ordering, by symbol then date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

pub struct DedupFilter;

impl DedupFilter {
    /// `candidates` minus `completed`, by exact key equality.
    ///
    /// Repeated candidates collapse onto their first occurrence; relative order is kept.
    pub fn filter(
        candidates: impl IntoIterator<Item = EntityKey>,
        completed: &CompletedKeySet,
    ) -> Vec<EntityKey> {
        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        let pending: Vec<EntityKey> = candidates
            .into_iter()
            .filter(|key| {
                if completed.contains(key) {
                    skipped += 1;
                    return false;
                }
                seen.insert(key.clone())
            })
            .collect();

        debug!(
            "🔍 Dedup: {} pending, {} already completed",
            pending.len(),
            skipped
        );
        pending
    }
}

/// Distinct candidate keys for `mode` projected from earning calendar rows, sorted.
pub fn candidate_keys<'a>(
    mode: ExtractionMode,
    calendar_rows: impl IntoIterator<Item = &'a Value>,
    order: SortOrder,
) -> Vec<EntityKey> {
    let mut keys: Vec<EntityKey> = calendar_rows
        .into_iter()
        .filter_map(|row| EntityKey::from_row(mode, row))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    keys.sort();
    if order == SortOrder::Descending {
        keys.reverse();
    }
    keys
}
