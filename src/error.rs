use thiserror::Error;

use crate::models::ExtractionMode;

/// Problems with the process configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable required")]
    MissingCredential(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("range_days must be between 1 and 36500, got {0}")]
    InvalidRangeDays(i64),

    #[error("unknown extraction mode: {0}")]
    UnknownMode(String),

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("failed to read secret from {path}: {reason}")]
    Secret { path: String, reason: String },
}

/// Failure of a single remote call. Never fatal: the fetcher turns it into a placeholder record.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status} from {path}")]
    Status { status: u16, path: String },

    #[error("malformed payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the api key, keep it out of logs
        let err = err.without_url();
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Run-level failures the caller may need to tell apart.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("flush of {records} {mode} records failed: {reason}")]
    Flush {
        mode: ExtractionMode,
        records: usize,
        reason: String,
    },

    #[error("{count} consecutive fetch failures (limit {limit}), aborting run")]
    TooManyFailures { count: usize, limit: usize },

    #[error("fetch task panicked: {0}")]
    TaskPanicked(String),
}
