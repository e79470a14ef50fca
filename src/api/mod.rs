use async_trait::async_trait;
use chrono::Duration;
use serde_json::Value;

use crate::error::FetchError;
use crate::models::{WorkItem, HISTORY_LOOKAHEAD_DAYS, HISTORY_LOOKBACK_DAYS};

pub mod fmp_client;
pub use fmp_client::FmpClient;

/// A fully resolved remote call, minus credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path relative to the API base URL
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    /// Build the single request a work item stands for
    pub fn for_item(item: &WorkItem) -> Self {
        match item {
            WorkItem::CalendarWindow(window) => Self {
                path: "earning_calendar".to_string(),
                params: vec![
                    ("from".to_string(), window.start_date.to_string()),
                    ("to".to_string(), window.last_day().to_string()),
                ],
            },
            WorkItem::EntityHistory { symbol, date } => Self {
                path: format!("historical-price-full/{}", symbol),
                params: vec![
                    ("from".to_string(), (*date - Duration::days(HISTORY_LOOKBACK_DAYS)).to_string()),
                    ("to".to_string(), (*date + Duration::days(HISTORY_LOOKAHEAD_DAYS)).to_string()),
                ],
            },
            WorkItem::EntityProfile(symbol) => Self {
                path: format!("profile/{}", symbol),
                params: Vec::new(),
            },
        }
    }
}

/// The remote data API as a single fetch capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch(&self, request: &ApiRequest) -> Result<Value, FetchError>;
}

/// Check a decoded payload has the shape its work item expects.
///
/// Calendar and profile endpoints answer with arrays, history with an object; anything else
/// (usually an error document served with a 200) is treated as a decode failure.
pub fn validate_payload(item: &WorkItem, payload: Value) -> Result<Value, FetchError> {
    let ok = match item {
        WorkItem::CalendarWindow(_) | WorkItem::EntityProfile(_) => payload.is_array(),
        WorkItem::EntityHistory { .. } => payload.is_object(),
    };
    if ok {
        Ok(payload)
    } else {
        Err(FetchError::Decode(format!(
            "unexpected payload shape for {}",
            item.mode()
        )))
    }
}
