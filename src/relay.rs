//! Start-job flows and callback reconciliation.
//!
//! A record moves `unset → running` when a job is submitted and
//! `running → done | error` when the provider calls back. The relay keeps no
//! job table: the callback is routed purely by the metadata echoed from the
//! original payload, and the last callback received wins.
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::airtable::{AttachmentRef, Fields, RecordStore, StoreError};
use crate::config::{Config, Tables};
use crate::payload::{build_job_payload, Mode, RecordFields};
use crate::wavespeed::{JobCreated, JobProvider, ProviderError};

pub const FAILED_FALLBACK_MESSAGE: &str = "Wavespeed job failed";

const STATUS_SUCCEEDED: &str = "succeeded";
const STATUS_FAILED: &str = "failed";

/// Relay-managed column names.
pub mod managed {
    pub const STATUS: &str = "Status";
    pub const ERROR_MESSAGE: &str = "Error Message";
    pub const JOB_ID: &str = "Wavespeed Job ID";
    pub const BATCH_ID: &str = "Batch ID";
    pub const OUTPUT_IMAGES: &str = "Output Images";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Running,
    Done,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Running => "running",
            RecordStatus::Done => "done",
            RecordStatus::Error => "error",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One start-job entry point per generation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Recreator,
    Poses,
}

impl Flow {
    pub fn mode(&self) -> Mode {
        match self {
            Flow::Recreator => Mode::Recreate,
            Flow::Poses => Mode::PoseVariations,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Inbound provider notification.
///
/// Built from any JSON value: fields with an unexpected type are dropped
/// rather than failing the parse, so every JSON body can be acknowledged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct CallbackEnvelope {
    pub status: Option<String>,
    /// Output image URLs, from `{url}` objects or bare strings.
    pub images: Vec<String>,
    pub error: Option<String>,
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackMetadata {
    pub airtable_record_id: Option<String>,
    pub table: Option<String>,
    pub mode: Option<Mode>,
}

impl From<Value> for CallbackEnvelope {
    fn from(body: Value) -> Self {
        let images = body
            .get("images")
            .and_then(Value::as_array)
            .map(|images| images.iter().filter_map(image_url).collect())
            .unwrap_or_default();

        Self {
            status: body.get("status").and_then(scalar_text),
            images,
            error: body.get("error").and_then(error_text),
            metadata: body.get("metadata").and_then(CallbackMetadata::from_value),
        }
    }
}

impl CallbackMetadata {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            airtable_record_id: map.get("airtable_record_id").and_then(scalar_text),
            table: map.get("table").and_then(scalar_text),
            mode: map
                .get("mode")
                .and_then(|mode| serde_json::from_value(mode.clone()).ok()),
        })
    }
}

impl CallbackEnvelope {
    /// `(table, record_id)` named by the echoed metadata, if both are present.
    pub fn target(&self) -> Option<(&str, &str)> {
        let metadata = self.metadata.as_ref()?;
        let record_id = non_blank(metadata.airtable_record_id.as_deref())?;
        let table = non_blank(metadata.table.as_deref())?;
        Some((table, record_id))
    }
}

/// Strings as-is, numbers and booleans rendered; anything else is `None`.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn image_url(entry: &Value) -> Option<String> {
    let url = match entry {
        Value::String(url) => url.as_str(),
        Value::Object(map) => map.get("url")?.as_str()?,
        _ => return None,
    };
    non_blank(Some(url)).map(str::to_string)
}

/// Error objects contribute their `message`, or their JSON text.
fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
        Value::Array(_) => Some(value.to_string()),
        scalar => scalar_text(scalar),
    }
}

/// What the callback flow did. The HTTP layer acknowledges every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied {
        table: String,
        record_id: String,
        status: RecordStatus,
    },
    Ignored {
        status: Option<String>,
    },
    Unroutable,
    StoreFailed {
        table: String,
        record_id: String,
        error: String,
    },
}

pub struct Relay {
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn JobProvider>,
    tables: Tables,
    callback_url: String,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("tables", &self.tables)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

impl Relay {
    pub fn new(
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn JobProvider>,
        tables: Tables,
        callback_url: String,
    ) -> Self {
        Self {
            store,
            provider,
            tables,
            callback_url,
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn JobProvider>,
    ) -> Self {
        Self::new(
            store,
            provider,
            cfg.airtable.tables.clone(),
            cfg.callback_url(),
        )
    }

    pub fn table(&self, flow: Flow) -> &str {
        match flow {
            Flow::Recreator => &self.tables.recreator,
            Flow::Poses => &self.tables.poses,
        }
    }

    /// Read the record, mark it running, submit the job and remember the
    /// provider identifiers on the record.
    ///
    /// Nothing is rolled back on failure: a record already marked running
    /// stays running.
    #[instrument(skip(self), fields(table = %self.table(flow), mode = %flow.mode()))]
    pub async fn start_job(
        &self,
        flow: Flow,
        record_id: Option<&str>,
    ) -> Result<JobCreated, RelayError> {
        let record_id = non_blank(record_id)
            .ok_or_else(|| RelayError::BadRequest("recordId required".into()))?;
        let table = self.table(flow);
        let mode = flow.mode();

        let raw = self.store.get_record(table, record_id).await?;

        let mut running = Fields::new();
        running.insert(managed::STATUS.into(), json!(RecordStatus::Running.as_str()));
        running.insert(managed::ERROR_MESSAGE.into(), json!(""));
        self.store.update_record(table, record_id, &running).await?;
        info!(record_id, "record marked running");

        let payload = build_job_payload(
            record_id,
            &RecordFields::new(&raw),
            mode,
            table,
            &self.callback_url,
        );
        let job = self.provider.create_job(&payload).await?;
        let job_id = job.job_id();
        let batch_id = job.batch_id();
        info!(record_id, job_id = ?job_id, batch_id = ?batch_id, "job submitted");

        let mut ids = Fields::new();
        if let Some(job_id) = job_id {
            ids.insert(managed::JOB_ID.into(), Value::String(job_id));
        }
        if let Some(batch_id) = batch_id {
            ids.insert(managed::BATCH_ID.into(), Value::String(batch_id));
        }
        if !ids.is_empty() {
            // The id columns are optional in the base; a failed write here
            // must not fail a job that was already accepted.
            if let Err(err) = self.store.update_record(table, record_id, &ids).await {
                warn!(?err, record_id, "could not store job identifiers");
            }
        }

        Ok(job)
    }

    /// Apply a provider callback to the record named in its metadata.
    #[instrument(skip_all, fields(status = ?envelope.status))]
    pub async fn handle_callback(&self, envelope: &CallbackEnvelope) -> CallbackOutcome {
        let Some((table, record_id)) = envelope.target() else {
            warn!(metadata = ?envelope.metadata, "callback without routable metadata");
            return CallbackOutcome::Unroutable;
        };

        let (status, patch) = match envelope.status.as_deref() {
            Some(STATUS_SUCCEEDED) => {
                let images: Vec<AttachmentRef> = envelope
                    .images
                    .iter()
                    .map(|url| AttachmentRef { url: url.clone() })
                    .collect();
                let mut patch = Fields::new();
                patch.insert(managed::STATUS.into(), json!(RecordStatus::Done.as_str()));
                patch.insert(managed::OUTPUT_IMAGES.into(), json!(images));
                patch.insert(managed::ERROR_MESSAGE.into(), json!(""));
                (RecordStatus::Done, patch)
            }
            Some(STATUS_FAILED) => {
                let message = non_blank(envelope.error.as_deref())
                    .unwrap_or(FAILED_FALLBACK_MESSAGE);
                let mut patch = Fields::new();
                patch.insert(managed::STATUS.into(), json!(RecordStatus::Error.as_str()));
                patch.insert(managed::ERROR_MESSAGE.into(), json!(message));
                (RecordStatus::Error, patch)
            }
            other => {
                info!(table, record_id, status = ?other, "ignoring non-terminal callback");
                return CallbackOutcome::Ignored {
                    status: other.map(str::to_string),
                };
            }
        };

        match self.store.update_record(table, record_id, &patch).await {
            Ok(()) => {
                info!(table, record_id, %status, "callback applied");
                CallbackOutcome::Applied {
                    table: table.to_string(),
                    record_id: record_id.to_string(),
                    status,
                }
            }
            Err(err) => {
                warn!(?err, table, record_id, "failed to apply callback");
                CallbackOutcome::StoreFailed {
                    table: table.to_string(),
                    record_id: record_id.to_string(),
                    error: err.to_string(),
                }
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
