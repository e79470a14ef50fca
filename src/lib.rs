pub mod accumulator;
pub mod api;
pub mod concurrent_fetcher;
pub mod database;
pub mod dataset;
pub mod dedup;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registrar;
pub mod storage;
pub mod watermark;
pub mod windows;

pub use error::{ConfigError, ExtractError, FetchError};
pub use models::{Config, ExtractionMode};
pub use pipeline::{Extractor, RunReport};
