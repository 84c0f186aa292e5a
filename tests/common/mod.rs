#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use wavespeed_relay::airtable::{Fields, RecordStore, StoreError};
use wavespeed_relay::config::Tables;
use wavespeed_relay::payload::JobPayload;
use wavespeed_relay::relay::Relay;
use wavespeed_relay::wavespeed::{JobCreated, JobProvider, ProviderError};

pub const RECREATOR_TABLE: &str = "Pinterest Recreator";
pub const POSES_TABLE: &str = "Pose Variations";
pub const CALLBACK_URL: &str = "https://relay.test/wavespeed/callback";

/// Every remote call, in the order it was issued.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get { table: String, record_id: String },
    Update { table: String, record_id: String, patch: Fields },
    CreateJob { payload: Value },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub async fn push(&self, call: Call) {
        self.0.lock().await.push(call);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.0.lock().await.clone()
    }

    pub async fn updates(&self) -> Vec<(String, String, Fields)> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::Update { table, record_id, patch } => Some((table, record_id, patch)),
                _ => None,
            })
            .collect()
    }

    pub async fn payloads(&self) -> Vec<Value> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::CreateJob { payload } => Some(payload),
                _ => None,
            })
            .collect()
    }
}

/// In-memory record store. Patches are merged into the stored fields so
/// tests can assert on final record state.
#[derive(Default)]
pub struct RecordingStore {
    log: CallLog,
    records: Mutex<HashMap<(String, String), Fields>>,
    get_errors: Mutex<VecDeque<StoreError>>,
    update_results: Mutex<VecDeque<Result<(), StoreError>>>,
}

impl RecordingStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub async fn insert(&self, table: &str, record_id: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => panic!("record fields must be an object"),
        };
        self.records
            .lock()
            .await
            .insert((table.to_string(), record_id.to_string()), fields);
    }

    pub async fn record(&self, table: &str, record_id: &str) -> Option<Fields> {
        self.records
            .lock()
            .await
            .get(&(table.to_string(), record_id.to_string()))
            .cloned()
    }

    pub async fn fail_next_get(&self, err: StoreError) {
        self.get_errors.lock().await.push_back(err);
    }

    /// Script the outcome of upcoming updates, in order. Unscripted updates succeed.
    pub async fn script_updates(&self, results: Vec<Result<(), StoreError>>) {
        self.update_results.lock().await.extend(results);
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn get_record(&self, table: &str, record_id: &str) -> Result<Fields, StoreError> {
        self.log
            .push(Call::Get {
                table: table.to_string(),
                record_id: record_id.to_string(),
            })
            .await;
        if let Some(err) = self.get_errors.lock().await.pop_front() {
            return Err(err);
        }
        self.record(table, record_id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                table: table.to_string(),
                record_id: record_id.to_string(),
            })
    }

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        patch: &Fields,
    ) -> Result<(), StoreError> {
        self.log
            .push(Call::Update {
                table: table.to_string(),
                record_id: record_id.to_string(),
                patch: patch.clone(),
            })
            .await;
        if let Some(result) = self.update_results.lock().await.pop_front() {
            result?;
        }
        let mut records = self.records.lock().await;
        let entry = records
            .entry((table.to_string(), record_id.to_string()))
            .or_default();
        for (name, value) in patch {
            entry.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

pub fn default_job() -> JobCreated {
    JobCreated(json!({ "job_id": "job-1", "batch_id": "batch-1", "status": "queued" }))
}

pub struct RecordingProvider {
    log: CallLog,
    responses: Mutex<VecDeque<Result<JobCreated, ProviderError>>>,
}

impl RecordingProvider {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn respond_with(&self, response: Result<JobCreated, ProviderError>) {
        self.responses.lock().await.push_back(response);
    }
}

#[async_trait]
impl JobProvider for RecordingProvider {
    async fn create_job(&self, payload: &JobPayload) -> Result<JobCreated, ProviderError> {
        self.log
            .push(Call::CreateJob {
                payload: serde_json::to_value(payload).unwrap(),
            })
            .await;
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(default_job()))
    }
}

pub struct Harness {
    pub log: CallLog,
    pub store: Arc<RecordingStore>,
    pub provider: Arc<RecordingProvider>,
    pub relay: Arc<Relay>,
}

pub fn harness() -> Harness {
    let log = CallLog::default();
    let store = Arc::new(RecordingStore::new(log.clone()));
    let provider = Arc::new(RecordingProvider::new(log.clone()));
    let relay = Arc::new(Relay::new(
        store.clone(),
        provider.clone(),
        Tables {
            recreator: RECREATOR_TABLE.to_string(),
            poses: POSES_TABLE.to_string(),
        },
        CALLBACK_URL.to_string(),
    ));
    Harness {
        log,
        store,
        provider,
        relay,
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => panic!("fields must be an object"),
    }
}
