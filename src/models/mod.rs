use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::windows::RangeDays;

/// Days before an earnings date included in a history request
pub const HISTORY_LOOKBACK_DAYS: i64 = 10;
/// Days after an earnings date included in a history request
pub const HISTORY_LOOKAHEAD_DAYS: i64 = 30;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// The three extraction flavours. The string form doubles as the storage folder/table suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionMode {
    EarningCalendar,
    Profile,
    HistoricalPriceFull,
}

impl ExtractionMode {
    /// Default run order: the calendar feeds the two entity modes.
    pub const ALL: [ExtractionMode; 3] = [
        ExtractionMode::EarningCalendar,
        ExtractionMode::Profile,
        ExtractionMode::HistoricalPriceFull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::EarningCalendar => "earning_calendar",
            ExtractionMode::Profile => "profile",
            ExtractionMode::HistoricalPriceFull => "historical_price_full",
        }
    }

    /// Whether work items of this mode are keyed by symbol rather than by date window
    pub fn is_entity_mode(&self) -> bool {
        !matches!(self, ExtractionMode::EarningCalendar)
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "earning_calendar" => Ok(ExtractionMode::EarningCalendar),
            "profile" => Ok(ExtractionMode::Profile),
            "historical_price_full" => Ok(ExtractionMode::HistoricalPriceFull),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Half-open date window `[start_date, end_date)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtractionWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ExtractionWindow {
    /// Windows reaching past the last representable date end there
    pub fn new(start_date: NaiveDate, range_days: RangeDays) -> Self {
        Self {
            start_date,
            end_date: start_date
                .checked_add_signed(Duration::days(range_days.get()))
                .unwrap_or(NaiveDate::MAX),
        }
    }

    /// Last day covered by the window (inclusive bound sent to the API)
    pub fn last_day(&self) -> NaiveDate {
        self.end_date - Duration::days(1)
    }
}

impl fmt::Display for ExtractionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_date, self.end_date)
    }
}

/// One unit of extraction work; builds exactly one remote request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    CalendarWindow(ExtractionWindow),
    EntityProfile(String),
    EntityHistory { symbol: String, date: NaiveDate },
}

impl WorkItem {
    pub fn mode(&self) -> ExtractionMode {
        match self {
            WorkItem::CalendarWindow(_) => ExtractionMode::EarningCalendar,
            WorkItem::EntityProfile(_) => ExtractionMode::Profile,
            WorkItem::EntityHistory { .. } => ExtractionMode::HistoricalPriceFull,
        }
    }

    /// Human readable key used in progress logs
    pub fn label(&self) -> String {
        match self {
            WorkItem::CalendarWindow(window) => window.end_date.to_string(),
            WorkItem::EntityProfile(symbol) => symbol.clone(),
            WorkItem::EntityHistory { symbol, date } => format!("{} - {}", symbol, date),
        }
    }

    /// Completed-key form of this item; calendar windows are tracked by watermark instead.
    pub fn entity_key(&self) -> Option<EntityKey> {
        match self {
            WorkItem::CalendarWindow(_) => None,
            WorkItem::EntityProfile(symbol) => Some(EntityKey::symbol(symbol.clone())),
            WorkItem::EntityHistory { symbol, date } => {
                Some(EntityKey::with_date(symbol.clone(), *date))
            }
        }
    }
}

/// Dedup key of an entity work item: `symbol` for profiles, `(symbol, date)` for history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub symbol: String,
    pub date: Option<NaiveDate>,
}

impl EntityKey {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date: None,
        }
    }

    pub fn with_date(symbol: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            date: Some(date),
        }
    }

    /// Project a persisted row onto the key columns of `mode`.
    ///
    /// Returns `None` when a key column is missing or unparseable, so rows without a
    /// usable key never count as completed work.
    pub fn from_row(mode: ExtractionMode, row: &Value) -> Option<Self> {
        let symbol = row.get("symbol").and_then(Value::as_str).map(normalize_symbol)?;
        if symbol.is_empty() {
            return None;
        }

        match mode {
            ExtractionMode::HistoricalPriceFull => {
                let date = row.get("date").and_then(Value::as_str).and_then(parse_date)?;
                Some(Self::with_date(symbol, date))
            }
            _ => Some(Self::symbol(symbol)),
        }
    }

    /// Row form used by registry artifacts
    pub fn to_row(&self) -> Value {
        match self.date {
            Some(date) => json!({ "symbol": self.symbol, "date": date.format(DATE_FORMAT).to_string() }),
            None => json!({ "symbol": self.symbol }),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date {
            Some(date) => write!(f, "{} - {}", self.symbol, date),
            None => f.write_str(&self.symbol),
        }
    }
}

/// Strip the brace wrapping some calendar rows carry around their symbol.
pub fn normalize_symbol(raw: &str) -> String {
    raw.replace(['{', '}'], "").trim().to_string()
}

/// Parse the leading `YYYY-MM-DD` of a date or datetime string.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Response for one work item. `payload == None` marks a placeholder: attempted, no data.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub item: WorkItem,
    pub payload: Option<Value>,
}

impl ResultRecord {
    pub fn success(item: WorkItem, payload: Value) -> Self {
        Self {
            item,
            payload: Some(payload),
        }
    }

    pub fn placeholder(item: WorkItem) -> Self {
        Self {
            item,
            payload: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.payload.is_none()
    }
}

/// Where artifacts and the completed-key registry live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// JSON files under a local root directory
    File,
    /// SQLite catalog with curated, raw and registry tables
    Catalog,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" | "local" => Ok(StorageBackend::File),
            "catalog" | "sqlite" => Ok(StorageBackend::Catalog),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    /// Only required for runs that talk to the API; see [`Config::require_api_key`]
    pub api_key: Option<String>,
    pub storage_backend: StorageBackend,
    pub storage_root: PathBuf,
    pub database_path: String,
    pub concurrency: usize,
    pub throttle_window: std::time::Duration,
    pub request_timeout: std::time::Duration,
    pub calendar_flush_threshold: usize,
    pub entity_flush_threshold: usize,
    pub range_days: RangeDays,
    pub default_start_date: NaiveDate,
    pub max_consecutive_failures: usize,
    pub registry_insert_chunk: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = match lookup("API_KEY").filter(|key| !key.trim().is_empty()) {
            Some(key) => Some(key.trim().to_string()),
            None => match lookup("API_KEY_FILE") {
                Some(path) => Some(read_secret_file(&path)?),
                None => None,
            },
        };

        let range_days: i64 = parse_var(&lookup, "RANGE_DAYS", 2)?;
        let default_start_date = match lookup("DEFAULT_START_DATE") {
            Some(raw) => parse_date(&raw).ok_or(ConfigError::InvalidValue {
                name: "DEFAULT_START_DATE",
                value: raw,
            })?,
            None => NaiveDate::from_ymd_opt(2018, 1, 1).expect("valid constant date"),
        };

        let config = Config {
            api_base_url: lookup("API_BASE_URL")
                .unwrap_or_else(|| "https://financialmodelingprep.com/api/v3/".to_string()),
            api_key,
            storage_backend: match lookup("STORAGE_BACKEND") {
                Some(raw) => raw.parse()?,
                None => StorageBackend::File,
            },
            storage_root: PathBuf::from(lookup("STORAGE_ROOT").unwrap_or_else(|| "date".to_string())),
            database_path: lookup("DATABASE_PATH").unwrap_or_else(|| "financial.db".to_string()),
            concurrency: parse_var(&lookup, "FETCH_CONCURRENCY", 5)?,
            throttle_window: std::time::Duration::from_millis(parse_var(&lookup, "THROTTLE_WINDOW_MS", 1000)?),
            request_timeout: std::time::Duration::from_secs(parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 30)?),
            calendar_flush_threshold: parse_var(&lookup, "CALENDAR_FLUSH_THRESHOLD", 15)?,
            entity_flush_threshold: parse_var(&lookup, "ENTITY_FLUSH_THRESHOLD", 4500)?,
            range_days: RangeDays::new(range_days)?,
            default_start_date,
            max_consecutive_failures: parse_var(&lookup, "MAX_CONSECUTIVE_FAILURES", 50)?,
            registry_insert_chunk: parse_var(&lookup, "REGISTRY_INSERT_CHUNK", 500)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("FETCH_CONCURRENCY", self.concurrency),
            ("CALENDAR_FLUSH_THRESHOLD", self.calendar_flush_threshold),
            ("ENTITY_FLUSH_THRESHOLD", self.entity_flush_threshold),
            ("MAX_CONSECUTIVE_FAILURES", self.max_consecutive_failures),
            ("REGISTRY_INSERT_CHUNK", self.registry_insert_chunk),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: value.to_string(),
                });
            }
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("API_KEY"))
    }

    /// Flush threshold (in result records) for `mode`
    pub fn flush_threshold(&self, mode: ExtractionMode) -> usize {
        match mode {
            ExtractionMode::EarningCalendar => self.calendar_flush_threshold,
            _ => self.entity_flush_threshold,
        }
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Secret documents look like `{"api_key": "..."}`
fn read_secret_file(path: &str) -> Result<String, ConfigError> {
    #[derive(Deserialize)]
    struct Secret {
        api_key: String,
    }

    let secret_error = |reason: String| ConfigError::Secret {
        path: path.to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| secret_error(e.to_string()))?;
    let secret: Secret = serde_json::from_str(&content).map_err(|e| secret_error(e.to_string()))?;
    Ok(secret.api_key)
}
