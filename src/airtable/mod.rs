use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::airtable::model::{RecordResp, UpdateRecordReq};
use crate::config::Config;

pub mod model;

pub use model::{AttachmentRef, Fields};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("airtable error {status}: {body}")]
    Unavailable { status: u16, body: String },
    #[error("record {record_id} not found in table {table}")]
    NotFound { table: String, record_id: String },
    #[error("failed to reach Airtable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Airtable URL: {0}")]
    InvalidUrl(String),
    #[error("invalid Airtable response: {0}")]
    Decode(String),
}

/// Typed read/patch access to records in the external store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch every field of a record.
    async fn get_record(&self, table: &str, record_id: &str) -> Result<Fields, StoreError>;

    /// Patch the named fields, leaving all others untouched.
    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        patch: &Fields,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct AirtableClient {
    http: Client,
    base_url: Url,
    token: String,
    base_id: String,
}

impl fmt::Debug for AirtableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtableClient")
            .field("base_url", &self.base_url)
            .field("base_id", &self.base_id)
            .finish_non_exhaustive()
    }
}

impl AirtableClient {
    pub fn from_config(cfg: &Config) -> Result<Self, StoreError> {
        Self::with_base_url(
            cfg.airtable.token.clone(),
            cfg.airtable.base_id.clone(),
            cfg.airtable.api_base.clone(),
        )
    }

    pub fn with_base_url(token: String, base_id: String, base_url: Url) -> Result<Self, StoreError> {
        let http = Client::builder()
            .user_agent(concat!("wavespeed-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token,
            base_id,
        })
    }

    /// `{base}/v0/{base_id}/{table}/{record_id}` with each segment percent-encoded.
    pub fn record_url(&self, table: &str, record_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v0", self.base_id.as_str(), table, record_id]);
        Ok(url)
    }

    pub fn build_get_request(&self, table: &str, record_id: &str) -> Result<reqwest::Request, StoreError> {
        let url = self.record_url(table, record_id)?;
        Ok(self
            .http
            .request(Method::GET, url)
            .bearer_auth(&self.token)
            .build()?)
    }

    pub fn build_update_request(
        &self,
        table: &str,
        record_id: &str,
        patch: &Fields,
    ) -> Result<reqwest::Request, StoreError> {
        let url = self.record_url(table, record_id)?;
        Ok(self
            .http
            .request(Method::PATCH, url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .json(&UpdateRecordReq { fields: patch })
            .build()?)
    }

    pub async fn get_record(&self, table: &str, record_id: &str) -> Result<Fields, StoreError> {
        let request = self.build_get_request(table, record_id)?;
        debug!(url = %request.url(), "fetching airtable record");
        let res = self.http.execute(request).await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                record_id: record_id.to_string(),
            });
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, table, record_id, "airtable fetch failed");
            return Err(StoreError::Unavailable {
                status: status.as_u16(),
                body,
            });
        }

        let body = res.text().await?;
        let record: RecordResp =
            serde_json::from_str(&body).map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(record.fields)
    }

    pub async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        patch: &Fields,
    ) -> Result<(), StoreError> {
        let request = self.build_update_request(table, record_id, patch)?;
        debug!(url = %request.url(), patch = ?patch, "patching airtable record");
        let res = self.http.execute(request).await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, table, record_id, "airtable update failed");
            return Err(StoreError::Unavailable {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn get_record(&self, table: &str, record_id: &str) -> Result<Fields, StoreError> {
        AirtableClient::get_record(self, table, record_id).await
    }

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        patch: &Fields,
    ) -> Result<(), StoreError> {
        AirtableClient::update_record(self, table, record_id, patch).await
    }
}
