//! Extraction run orchestration
//!
//! Calendar mode walks date windows from the watermark; entity modes walk the pending keys
//! derived from the calendar output. Both feed the same dispatcher, accumulator and sink.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::accumulator::{BatchAccumulator, BatchSink};
use crate::api::RemoteApi;
use crate::concurrent_fetcher::{Dispatcher, FetchConfig, FetchSummary};
use crate::dedup::SortOrder;
use crate::error::ExtractError;
use crate::models::{Config, ExtractionMode, ResultRecord, WorkItem};
use crate::registrar::ProgressRegistrar;
use crate::storage::Storage;
use crate::watermark::WatermarkResolver;
use crate::windows::{entity_items, CalendarWindows};

/// What one mode did during a run
#[derive(Debug, Clone, PartialEq)]
pub struct ModeReport {
    pub mode: ExtractionMode,
    pub fetch: FetchSummary,
    pub records_flushed: usize,
    pub rows_written: usize,
    pub artifacts: Vec<String>,
    pub keys_registered: usize,
}

impl ModeReport {
    pub fn new(mode: ExtractionMode) -> Self {
        Self {
            mode,
            fetch: FetchSummary::default(),
            records_flushed: 0,
            rows_written: 0,
            artifacts: Vec::new(),
            keys_registered: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub modes: Vec<ModeReport>,
}

impl RunReport {
    pub fn dispatched(&self) -> usize {
        self.modes.iter().map(|m| m.fetch.dispatched).sum()
    }

    pub fn for_mode(&self, mode: ExtractionMode) -> Option<&ModeReport> {
        self.modes.iter().find(|m| m.mode == mode)
    }
}

pub struct Extractor {
    config: Config,
    client: Arc<dyn RemoteApi>,
    store: Arc<dyn Storage>,
    today: NaiveDate,
    order: SortOrder,
}

impl Extractor {
    pub fn new(config: Config, client: Arc<dyn RemoteApi>, store: Arc<dyn Storage>) -> Self {
        Self {
            config,
            client,
            store,
            today: Utc::now().date_naive(),
            order: SortOrder::Ascending,
        }
    }

    /// Pin the date used as "now" for windows and `data_process`
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Run `modes` in order, stopping at the first failing mode
    pub async fn run(&self, modes: &[ExtractionMode]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for &mode in modes {
            match self.run_mode(mode).await {
                Ok(mode_report) => report.modes.push(mode_report),
                Err(e) => {
                    error!("❌ {} extraction failed: {:#}", mode, e);
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    pub async fn run_mode(&self, mode: ExtractionMode) -> Result<ModeReport> {
        info!("🚀 Starting {} extraction", mode);
        let report = match mode {
            ExtractionMode::EarningCalendar => self.extract_calendar().await?,
            _ => self.extract_entities(mode).await?,
        };
        info!(
            "✅ {} complete: {} requests ({} failed), {} records in {} artifacts",
            mode,
            report.fetch.dispatched,
            report.fetch.failed,
            report.records_flushed,
            report.artifacts.len()
        );
        Ok(report)
    }

    fn dispatcher(&self, accumulator: &BatchAccumulator) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.client),
            accumulator.buffer(),
            FetchConfig::from(&self.config),
        )
    }

    /// Fetch every window between the watermark and today
    pub async fn extract_calendar(&self) -> Result<ModeReport> {
        let mode = ExtractionMode::EarningCalendar;
        let mut report = ModeReport::new(mode);

        let watermark = WatermarkResolver::new(self.config.default_start_date)
            .resolve(self.store.as_ref(), mode)
            .await?;
        let windows = CalendarWindows::new(watermark, self.today, self.config.range_days);
        info!("📊 {} windows of {} days to fetch", windows.len(), self.config.range_days.get());

        let accumulator = BatchAccumulator::new(self.config.flush_threshold(mode));
        let sink = BatchSink::new(Arc::clone(&self.store), self.today);
        let mut dispatcher = self.dispatcher(&accumulator);

        for window in windows {
            dispatcher.submit(WorkItem::CalendarWindow(window)).await?;
            if accumulator.ready().await {
                // Every earlier window must be persisted before the watermark moves past it
                dispatcher.drain().await?;
                self.flush_calendar(&accumulator, &sink, &mut report).await?;
            }
        }
        dispatcher.drain().await?;
        self.flush_calendar(&accumulator, &sink, &mut report).await?;

        report.fetch = dispatcher.summary();
        Ok(report)
    }

    /// Flush everything buffered in window order, one threshold-sized artifact at a time
    async fn flush_calendar(
        &self,
        accumulator: &BatchAccumulator,
        sink: &BatchSink,
        report: &mut ModeReport,
    ) -> Result<()> {
        let mut records = accumulator.take_all().await;
        records.sort_by_key(|record| match &record.item {
            WorkItem::CalendarWindow(window) => Some(window.start_date),
            _ => None,
        });

        while !records.is_empty() {
            let rest = records.split_off(accumulator.threshold().min(records.len()));
            let batch = std::mem::replace(&mut records, rest);
            if let Err(e) = self.commit(ExtractionMode::EarningCalendar, batch, accumulator, sink, None, report).await {
                // Later windows go back too so nothing past the failed batch is flushed
                accumulator.restore(records).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Fetch every pending key of an entity mode
    pub async fn extract_entities(&self, mode: ExtractionMode) -> Result<ModeReport> {
        let mut report = ModeReport::new(mode);

        self.store.ensure_location(mode).await?;
        let pending = self
            .store
            .pending_keys(mode, self.order)
            .await
            .with_context(|| format!("failed to query pending {} keys", mode))?;
        info!("📊 {} pending {} keys", pending.len(), mode);

        let accumulator = BatchAccumulator::new(self.config.flush_threshold(mode));
        let sink = BatchSink::new(Arc::clone(&self.store), self.today);
        let registrar = ProgressRegistrar::new(Arc::clone(&self.store), self.config.registry_insert_chunk);
        let mut dispatcher = self.dispatcher(&accumulator);

        for item in entity_items(mode, pending) {
            dispatcher.submit(item).await?;
            while let Some(batch) = accumulator.take_batch().await {
                self.commit(mode, batch, &accumulator, &sink, Some(&registrar), &mut report)
                    .await?;
            }
        }
        dispatcher.drain().await?;

        while let Some(batch) = accumulator.take_batch().await {
            self.commit(mode, batch, &accumulator, &sink, Some(&registrar), &mut report)
                .await?;
        }
        let rest = accumulator.take_all().await;
        if !rest.is_empty() {
            self.commit(mode, rest, &accumulator, &sink, Some(&registrar), &mut report)
                .await?;
        }

        report.fetch = dispatcher.summary();
        Ok(report)
    }

    /// Flush one batch, then register its keys. A failed flush puts the batch back.
    async fn commit(
        &self,
        mode: ExtractionMode,
        batch: Vec<ResultRecord>,
        accumulator: &BatchAccumulator,
        sink: &BatchSink,
        registrar: Option<&ProgressRegistrar>,
        report: &mut ModeReport,
    ) -> Result<()> {
        let receipt = match sink.flush(mode, &batch).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let records = batch.len();
                accumulator.restore(batch).await;
                return Err(ExtractError::Flush {
                    mode,
                    records,
                    reason: format!("{:#}", e),
                }
                .into());
            }
        };

        if let Some(registrar) = registrar {
            report.keys_registered += registrar.record(mode, &receipt.keys).await?;
        }
        report.records_flushed += receipt.records;
        report.rows_written += receipt.rows;
        report.artifacts.push(receipt.artifact);
        Ok(())
    }
}
