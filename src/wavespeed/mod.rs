use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::payload::JobPayload;

pub mod model;

pub use model::JobCreated;

const JOBS_PATH: &str = "jobs";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("wavespeed error {status}: {body}")]
    Unavailable { status: u16, body: String },
    #[error("failed to reach Wavespeed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Wavespeed URL: {0}")]
    InvalidUrl(String),
    #[error("invalid Wavespeed response: {0}")]
    Decode(String),
}

/// Submits generation jobs. Completion arrives later through the callback
/// endpoint, never through this trait.
#[async_trait]
pub trait JobProvider: Send + Sync {
    async fn create_job(&self, payload: &JobPayload) -> Result<JobCreated, ProviderError>;
}

#[derive(Clone)]
pub struct WavespeedClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for WavespeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WavespeedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl WavespeedClient {
    pub fn from_config(cfg: &Config) -> Result<Self, ProviderError> {
        Self::with_base_url(cfg.wavespeed.api_key.clone(), cfg.wavespeed.api_base.clone())
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(concat!("wavespeed-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn build_request(&self, payload: &JobPayload) -> Result<reqwest::Request, ProviderError> {
        let endpoint = self
            .base_url
            .join(JOBS_PATH)
            .map_err(|err| ProviderError::InvalidUrl(err.to_string()))?;
        Ok(self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(payload)
            .build()?)
    }

    pub async fn create_job(&self, payload: &JobPayload) -> Result<JobCreated, ProviderError> {
        let request = self.build_request(payload)?;
        debug!(url = %request.url(), payload = ?payload, "submitting wavespeed job");
        let res = self.http.execute(request).await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "wavespeed job submission failed");
            return Err(ProviderError::Unavailable {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        let created: JobCreated =
            serde_json::from_str(&body).map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(created)
    }
}

#[async_trait]
impl JobProvider for WavespeedClient {
    async fn create_job(&self, payload: &JobPayload) -> Result<JobCreated, ProviderError> {
        WavespeedClient::create_job(self, payload).await
    }
}
