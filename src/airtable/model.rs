use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw field mapping of a record, keyed by column display name.
pub type Fields = Map<String, Value>;

/// Single-record response; only the field mapping is consumed.
#[derive(Deserialize, Debug)]
pub struct RecordResp {
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Serialize, Debug)]
pub struct UpdateRecordReq<'a> {
    pub fields: &'a Fields,
}

/// Attachment entry as accepted by attachment-list columns on write.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
}
