use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job-creation result, kept verbatim so it can be relayed to the caller.
///
/// Identifier lookup is lenient: the submission schema is provisional, so
/// `job_id`/`jobId`/`id` and `batch_id`/`batchId` are all accepted, either at
/// the top level or nested under `data`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct JobCreated(pub Value);

impl JobCreated {
    pub fn job_id(&self) -> Option<String> {
        self.lookup(&["job_id", "jobId", "id"])
    }

    pub fn batch_id(&self) -> Option<String> {
        self.lookup(&["batch_id", "batchId"])
    }

    fn lookup(&self, keys: &[&str]) -> Option<String> {
        let scopes = [Some(&self.0), self.0.get("data")];
        scopes
            .into_iter()
            .flatten()
            .flat_map(|scope| keys.iter().filter_map(move |key| scope.get(*key)))
            .find_map(scalar_to_string)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
