//! Rate-limited concurrent fetching
//!
//! Every work item becomes one spawned task performing exactly one remote call. Dispatch is
//! burst-and-drain: once `concurrency` tasks are in flight the dispatcher waits for all of
//! them, and if the burst finished inside the throttle window it sleeps out the remainder.

use futures::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::accumulator::ResultBuffer;
use crate::api::{validate_payload, ApiRequest, RemoteApi};
use crate::error::{ExtractError, FetchError};
use crate::models::{Config, ResultRecord, WorkItem};

/// Configuration for concurrent fetching
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub throttle_window: Duration,
    pub request_timeout: Duration,
    pub max_consecutive_failures: usize,
}

impl From<&Config> for FetchConfig {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            throttle_window: config.throttle_window,
            request_timeout: config.request_timeout,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// Shared counters updated by fetch tasks
#[derive(Debug, Default)]
struct FetchCounters {
    dispatched: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    consecutive_failures: AtomicUsize,
}

impl FetchCounters {
    fn record(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Totals for one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    client: Arc<dyn RemoteApi>,
    buffer: ResultBuffer,
    config: FetchConfig,
    in_flight: Vec<JoinHandle<()>>,
    checkpoint: Instant,
    counters: Arc<FetchCounters>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn RemoteApi>, buffer: ResultBuffer, config: FetchConfig) -> Self {
        Self {
            client,
            buffer,
            config,
            in_flight: Vec::new(),
            checkpoint: Instant::now(),
            counters: Arc::new(FetchCounters::default()),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Spawn the fetch for `item`, draining the burst once it is full
    pub async fn submit(&mut self, item: WorkItem) -> Result<(), ExtractError> {
        let client = Arc::clone(&self.client);
        let buffer = self.buffer.clone();
        let counters = Arc::clone(&self.counters);
        let request_timeout = self.config.request_timeout;

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        self.in_flight.push(tokio::spawn(async move {
            let record = fetch_one(client.as_ref(), item, request_timeout).await;
            counters.record(!record.is_placeholder());
            buffer.push(record).await;
        }));

        if self.in_flight.len() >= self.config.concurrency.max(1) {
            self.throttle().await?;
        }
        Ok(())
    }

    async fn throttle(&mut self) -> Result<(), ExtractError> {
        info!("⏳ Delay... {} requests in flight", self.in_flight.len());
        self.drain().await?;

        let elapsed = self.checkpoint.elapsed();
        if elapsed < self.config.throttle_window {
            sleep(self.config.throttle_window - elapsed).await;
        }
        self.checkpoint = Instant::now();
        Ok(())
    }

    /// Wait for every in-flight task. A panicked task or a failure streak aborts the run.
    pub async fn drain(&mut self) -> Result<(), ExtractError> {
        let handles = std::mem::take(&mut self.in_flight);
        if !handles.is_empty() {
            debug!("Draining {} in-flight requests", handles.len());
        }
        for joined in join_all(handles).await {
            joined.map_err(|e| ExtractError::TaskPanicked(e.to_string()))?;
        }
        self.check_failures()
    }

    fn check_failures(&self) -> Result<(), ExtractError> {
        let count = self.counters.consecutive_failures.load(Ordering::Relaxed);
        if count > self.config.max_consecutive_failures {
            return Err(ExtractError::TooManyFailures {
                count,
                limit: self.config.max_consecutive_failures,
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> FetchSummary {
        FetchSummary {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Perform the single remote call of `item`. Any failure becomes a placeholder record.
pub async fn fetch_one(client: &dyn RemoteApi, item: WorkItem, request_timeout: Duration) -> ResultRecord {
    let request = ApiRequest::for_item(&item);
    let started = Instant::now();

    let outcome: Result<Value, FetchError> = match timeout(request_timeout, client.fetch(&request)).await {
        Ok(result) => result.and_then(|payload| validate_payload(&item, payload)),
        Err(_) => Err(FetchError::Timeout),
    };

    info!(
        "API request {} completed in {:.2} seconds.",
        item.label(),
        started.elapsed().as_secs_f64()
    );

    match outcome {
        Ok(payload) => ResultRecord::success(item, payload),
        Err(e) => {
            warn!("⚠️ {} request for {} failed: {}", item.mode(), item.label(), e);
            ResultRecord::placeholder(item)
        }
    }
}
