//! Fake remote API, failing storage and config builders

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use financial_etl::api::{ApiRequest, RemoteApi};
use financial_etl::dedup::{CompletedKeySet, SortOrder};
use financial_etl::error::FetchError;
use financial_etl::models::{Config, EntityKey, ExtractionMode};
use financial_etl::storage::{ArtifactStore, FileStore, KeyLedger};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Config with no throttling and the given overrides on top of the defaults
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("API_KEY".to_string(), "test_key".to_string()),
        ("THROTTLE_WINDOW_MS".to_string(), "0".to_string()),
        ("DEFAULT_START_DATE".to_string(), "2024-01-01".to_string()),
    ]);
    for (name, value) in overrides {
        vars.insert(name.to_string(), value.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

type Responder = dyn Fn(&ApiRequest) -> Result<Value, FetchError> + Send + Sync;

/// Remote API answering from a closure and logging every request path
pub struct ScriptedApi {
    respond: Box<Responder>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<Value, FetchError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Profiles echo the symbol, history answers one bar, calendar answers nothing
    pub fn healthy() -> Self {
        Self::new(|request| Ok(default_response(request)))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn default_response(request: &ApiRequest) -> Value {
    if let Some(symbol) = request.path.strip_prefix("profile/") {
        json!([{ "symbol": symbol, "companyName": format!("{} Corp", symbol) }])
    } else if let Some(symbol) = request.path.strip_prefix("historical-price-full/") {
        json!({ "symbol": symbol, "historical": [{ "date": "2024-01-26", "close": 100.5 }] })
    } else {
        json!([])
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn fetch(&self, request: &ApiRequest) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(request.path.clone());
        (self.respond)(request)
    }
}

/// File store whose artifact writes fail for one mode
pub struct FailingStore {
    inner: FileStore,
    fail_mode: ExtractionMode,
}

impl FailingStore {
    pub fn new(root: &Path, fail_mode: ExtractionMode) -> Self {
        Self {
            inner: FileStore::new(root),
            fail_mode,
        }
    }
}

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn ensure_location(&self, mode: ExtractionMode) -> Result<()> {
        self.inner.ensure_location(mode).await
    }

    async fn artifact_names(&self, mode: ExtractionMode) -> Result<Vec<String>> {
        self.inner.artifact_names(mode).await
    }

    async fn read_rows(&self, mode: ExtractionMode) -> Result<Vec<Value>> {
        self.inner.read_rows(mode).await
    }

    async fn write_artifact(&self, mode: ExtractionMode, name: &str, rows: &[Value]) -> Result<()> {
        if mode == self.fail_mode {
            anyhow::bail!("no space left on device");
        }
        self.inner.write_artifact(mode, name, rows).await
    }
}

#[async_trait]
impl KeyLedger for FailingStore {
    async fn candidate_keys(&self, mode: ExtractionMode, order: SortOrder) -> Result<Vec<EntityKey>> {
        self.inner.candidate_keys(mode, order).await
    }

    async fn completed_keys(&self, mode: ExtractionMode) -> Result<CompletedKeySet> {
        self.inner.completed_keys(mode).await
    }

    async fn record(&self, mode: ExtractionMode, keys: &[EntityKey]) -> Result<()> {
        self.inner.record(mode, keys).await
    }
}

/// Calendar output listing AAPL, MSFT and NVDA, as a completed calendar run would leave it
pub async fn seed_calendar<S: ArtifactStore + ?Sized>(store: &S) {
    store
        .write_artifact(
            ExtractionMode::EarningCalendar,
            "2024-01-31",
            &[
                json!({"symbol": "AAPL", "date": "2024-01-25", "eps": 2.18}),
                json!({"symbol": "MSFT", "date": "2024-01-30", "eps": 2.93}),
                json!({"symbol": "{NVDA}", "date": "2024-01-30", "eps": 4.93}),
            ],
        )
        .await
        .unwrap();
}
