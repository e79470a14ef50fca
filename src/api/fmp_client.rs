use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{ApiRequest, RemoteApi};
use crate::error::FetchError;
use crate::models::Config;

/// Financial Modeling Prep API client
pub struct FmpClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl FmpClient {
    /// Create a new client. Fails on a missing API key or an unparseable base URL.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("financial-etl/0.1")
            .build()?;

        let mut base_url = Url::parse(&config.api_base_url)
            .with_context(|| format!("invalid API_BASE_URL: {}", config.api_base_url))?;
        // Url::join drops the last path segment unless the base ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&request.path)
            .map_err(|e| FetchError::Transport(format!("bad request path {}: {}", request.path, e)))?;
        url.query_pairs_mut()
            .extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .append_pair("apikey", &self.api_key);
        Ok(url)
    }
}

#[async_trait]
impl RemoteApi for FmpClient {
    async fn fetch(&self, request: &ApiRequest) -> Result<Value, FetchError> {
        let url = self.url_for(request)?;
        debug!("GET {} {:?}", request.path, request.params);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                path: request.path.clone(),
            });
        }

        Ok(response.json::<Value>().await?)
    }
}
