//! Calendar watermark: the date from which the next calendar extraction resumes.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::models::{parse_date, ExtractionMode};
use crate::storage::ArtifactStore;

pub struct WatermarkResolver {
    default_start: NaiveDate,
}

impl WatermarkResolver {
    pub fn new(default_start: NaiveDate) -> Self {
        Self { default_start }
    }

    /// Greatest artifact name of `mode` that parses as an ISO date, or the default start.
    ///
    /// Creates the storage location first, so a fresh root resolves to the default without
    /// erroring. Names that are not dates are ignored.
    pub async fn resolve<S>(&self, store: &S, mode: ExtractionMode) -> Result<NaiveDate>
    where
        S: ArtifactStore + ?Sized,
    {
        store.ensure_location(mode).await?;

        let names = store.artifact_names(mode).await?;
        let latest = names
            .iter()
            .filter(|name| name.len() == 10)
            .filter_map(|name| parse_date(name))
            .max();

        match latest {
            Some(date) => {
                info!("📅 Resuming {} from watermark {}", mode, date);
                Ok(date)
            }
            None => {
                info!("📅 No {} artifacts yet, starting from {}", mode, self.default_start);
                Ok(self.default_start)
            }
        }
    }
}
