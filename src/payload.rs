//! Record fields → job submission payload.
//!
//! [`RecordFields`] is a read-only typed view over the raw field map fetched
//! from Airtable; [`build_job_payload`] interprets it for a given [`Mode`] and
//! applies defaults. Neither touches the network.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::airtable::Fields;

pub const DEFAULT_SAMPLER: &str = "DPM++ 2M Karras";
pub const DEFAULT_CFG_SCALE: f64 = 8.0;
pub const DEFAULT_STEPS: u32 = 35;
pub const DEFAULT_REFERENCE_STRENGTH: f64 = 0.85;

/// Column names read from the generation tables.
pub mod field {
    pub const MODEL_ID: &str = "Model ID";
    pub const PROMPT: &str = "Prompt";
    pub const NEGATIVE_PROMPT: &str = "Negative Prompt";
    pub const CFG: &str = "CFG";
    pub const STEPS: &str = "Steps";
    pub const SAMPLER: &str = "Sampler";
    pub const FACE_LOCK: &str = "Face Lock";
    pub const REFERENCE_STRENGTH: &str = "Reference Strength";
    pub const POSE_CONTROL: &str = "Pose Control";
    pub const LIGHTING_CONTROL: &str = "Lighting Control";
    pub const REFERENCE_IMAGE_URL: &str = "Reference Image URL";
    pub const REFERENCE_IMAGE: &str = "Reference Image";
    pub const SOURCE_IMAGE: &str = "Source Image";
    pub const POSES: &str = "Poses";
}

/// Generation mode tag sent to the provider and echoed back in callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Recreate,
    PoseVariations,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Recreate => "recreate",
            Mode::PoseVariations => "pose_variations",
        }
    }

    /// Attachment columns searched, in order, when no explicit URL is set.
    fn image_attachment_fields(&self) -> &'static [&'static str] {
        match self {
            Mode::Recreate => &[field::REFERENCE_IMAGE],
            Mode::PoseVariations => &[field::SOURCE_IMAGE, field::REFERENCE_IMAGE],
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation data echoed back verbatim by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub airtable_record_id: String,
    pub table: String,
    pub mode: Mode,
}

/// Job submission body. Key names follow the provisional provider schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPayload {
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler: String,
    pub cfg_scale: f64,
    pub steps: u32,
    pub reference_strength: f64,
    pub face_lock: bool,
    pub pose_control: bool,
    pub lighting_control: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poses: Option<Vec<String>>,
    pub webhook_url: String,
    pub metadata: JobMetadata,
}

/// Typed view over a record's raw fields. Every accessor returns `None` (or
/// `false`) for absent, null or wrongly-typed values.
#[derive(Debug, Clone, Copy)]
pub struct RecordFields<'a> {
    raw: &'a Fields,
}

impl<'a> RecordFields<'a> {
    pub fn new(raw: &'a Fields) -> Self {
        Self { raw }
    }

    /// Non-blank string value. Numbers are rendered as text.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.raw.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Numeric value; numeric strings are accepted.
    pub fn number(&self, name: &str) -> Option<f64> {
        let n = match self.raw.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }

    /// Truthiness: absent, null, `false`, `0` and `""` are false.
    pub fn flag(&self, name: &str) -> bool {
        match self.raw.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
        }
    }

    /// URL of the first entry in an attachment-list column.
    pub fn first_attachment_url(&self, name: &str) -> Option<String> {
        self.raw
            .get(name)?
            .as_array()?
            .first()?
            .get("url")?
            .as_str()
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
    }

    pub fn model_id(&self) -> Option<String> {
        self.text(field::MODEL_ID)
    }

    pub fn prompt(&self) -> String {
        self.text(field::PROMPT).unwrap_or_default()
    }

    pub fn negative_prompt(&self) -> String {
        self.text(field::NEGATIVE_PROMPT).unwrap_or_default()
    }

    pub fn sampler(&self) -> String {
        self.text(field::SAMPLER)
            .unwrap_or_else(|| DEFAULT_SAMPLER.to_string())
    }

    /// Like [`RecordFields::number`], but zero and negative values count as
    /// unset. Applies to every numeric tunable.
    pub fn positive(&self, name: &str) -> Option<f64> {
        self.number(name).filter(|n| *n > 0.0)
    }

    pub fn cfg_scale(&self) -> f64 {
        self.positive(field::CFG).unwrap_or(DEFAULT_CFG_SCALE)
    }

    pub fn steps(&self) -> u32 {
        self.positive(field::STEPS)
            .map(f64::round)
            .filter(|n| *n >= 1.0 && *n <= u32::MAX as f64)
            .map(|n| n as u32)
            .unwrap_or(DEFAULT_STEPS)
    }

    pub fn reference_strength(&self) -> f64 {
        self.positive(field::REFERENCE_STRENGTH)
            .unwrap_or(DEFAULT_REFERENCE_STRENGTH)
    }

    pub fn face_lock(&self) -> bool {
        self.flag(field::FACE_LOCK)
    }

    pub fn pose_control(&self) -> bool {
        self.flag(field::POSE_CONTROL)
    }

    pub fn lighting_control(&self) -> bool {
        self.flag(field::LIGHTING_CONTROL)
    }

    /// Explicit URL column first, then the first attachment of the mode's
    /// image columns.
    pub fn image_url(&self, mode: Mode) -> Option<String> {
        self.text(field::REFERENCE_IMAGE_URL)
            .map(|url| url.trim().to_string())
            .or_else(|| {
                mode.image_attachment_fields()
                    .iter()
                    .find_map(|name| self.first_attachment_url(name))
            })
    }

    pub fn poses(&self) -> Vec<String> {
        self.raw
            .get(field::POSES)
            .and_then(Value::as_str)
            .map(parse_poses)
            .unwrap_or_default()
    }
}

/// Split newline-delimited pose text into trimmed, non-empty descriptors,
/// preserving order.
pub fn parse_poses(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the provider payload for one record. Pure: the same inputs always
/// yield the same payload.
pub fn build_job_payload(
    record_id: &str,
    fields: &RecordFields<'_>,
    mode: Mode,
    table: &str,
    webhook_url: &str,
) -> JobPayload {
    let poses = match mode {
        Mode::PoseVariations => Some(fields.poses()).filter(|poses| !poses.is_empty()),
        Mode::Recreate => None,
    };

    JobPayload {
        mode,
        model_id: fields.model_id(),
        prompt: fields.prompt(),
        negative_prompt: fields.negative_prompt(),
        sampler: fields.sampler(),
        cfg_scale: fields.cfg_scale(),
        steps: fields.steps(),
        reference_strength: fields.reference_strength(),
        face_lock: fields.face_lock(),
        pose_control: fields.pose_control(),
        lighting_control: fields.lighting_control(),
        reference_image_url: fields.image_url(mode),
        poses,
        webhook_url: webhook_url.to_string(),
        metadata: JobMetadata {
            airtable_record_id: record_id.to_string(),
            table: table.to_string(),
            mode,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEBHOOK: &str = "https://relay.example.com/wavespeed/callback";

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    fn payload_for(raw: &Fields, mode: Mode) -> JobPayload {
        build_job_payload("rec123", &RecordFields::new(raw), mode, "Table", WEBHOOK)
    }

    #[test]
    fn empty_record_gets_defaults() {
        let raw = Fields::new();
        let payload = payload_for(&raw, Mode::Recreate);

        assert_eq!(payload.sampler, DEFAULT_SAMPLER);
        assert_eq!(payload.cfg_scale, 8.0);
        assert_eq!(payload.steps, 35);
        assert_eq!(payload.reference_strength, 0.85);
        assert!(!payload.face_lock);
        assert!(!payload.pose_control);
        assert!(!payload.lighting_control);
        assert_eq!(payload.prompt, "");
        assert_eq!(payload.model_id, None);
        assert_eq!(payload.reference_image_url, None);
        assert_eq!(payload.poses, None);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let raw = fields(json!({
            "Model ID": "model-x",
            "Prompt": "portrait, soft light",
            "Negative Prompt": "blurry",
            "CFG": 6.5,
            "Steps": "20",
            "Sampler": "Euler a",
            "Face Lock": true,
            "Reference Strength": 0.5,
            "Pose Control": 1,
            "Lighting Control": false,
        }));
        let payload = payload_for(&raw, Mode::Recreate);

        assert_eq!(payload.model_id.as_deref(), Some("model-x"));
        assert_eq!(payload.prompt, "portrait, soft light");
        assert_eq!(payload.negative_prompt, "blurry");
        assert_eq!(payload.cfg_scale, 6.5);
        assert_eq!(payload.steps, 20);
        assert_eq!(payload.sampler, "Euler a");
        assert!(payload.face_lock);
        assert_eq!(payload.reference_strength, 0.5);
        assert!(payload.pose_control);
        assert!(!payload.lighting_control);
    }

    #[test]
    fn unusable_values_fall_back() {
        let raw = fields(json!({
            "CFG": "high",
            "Steps": 0,
            "Sampler": "   ",
            "Face Lock": "",
            "Reference Strength": null,
        }));
        let payload = payload_for(&raw, Mode::Recreate);

        assert_eq!(payload.cfg_scale, DEFAULT_CFG_SCALE);
        assert_eq!(payload.steps, DEFAULT_STEPS);
        assert_eq!(payload.sampler, DEFAULT_SAMPLER);
        assert!(!payload.face_lock);
        assert_eq!(payload.reference_strength, DEFAULT_REFERENCE_STRENGTH);
    }

    #[test]
    fn non_positive_tunables_are_unset() {
        let raw = fields(json!({
            "CFG": 0,
            "Steps": -4,
            "Reference Strength": "0",
        }));
        let payload = payload_for(&raw, Mode::Recreate);
        assert_eq!(payload.cfg_scale, DEFAULT_CFG_SCALE);
        assert_eq!(payload.steps, DEFAULT_STEPS);
        assert_eq!(payload.reference_strength, DEFAULT_REFERENCE_STRENGTH);

        let raw = fields(json!({ "CFG": 0.5, "Steps": 1, "Reference Strength": 0.01 }));
        let payload = payload_for(&raw, Mode::Recreate);
        assert_eq!(payload.cfg_scale, 0.5);
        assert_eq!(payload.steps, 1);
        assert_eq!(payload.reference_strength, 0.01);
    }

    #[test]
    fn explicit_url_wins_over_attachment() {
        let raw = fields(json!({
            "Reference Image URL": " https://img/explicit.png ",
            "Reference Image": [{ "url": "https://img/attached.png" }],
        }));
        let payload = payload_for(&raw, Mode::Recreate);
        assert_eq!(
            payload.reference_image_url.as_deref(),
            Some("https://img/explicit.png")
        );
    }

    #[test]
    fn first_attachment_used_without_explicit_url() {
        let raw = fields(json!({
            "Reference Image": [
                { "id": "att1", "url": "https://img/first.png", "filename": "first.png" },
                { "id": "att2", "url": "https://img/second.png" }
            ],
        }));
        let payload = payload_for(&raw, Mode::Recreate);
        assert_eq!(
            payload.reference_image_url.as_deref(),
            Some("https://img/first.png")
        );
    }

    #[test]
    fn pose_mode_prefers_source_image() {
        let raw = fields(json!({
            "Reference Image": [{ "url": "https://img/ref.png" }],
            "Source Image": [{ "url": "https://img/source.png" }],
        }));
        let payload = payload_for(&raw, Mode::PoseVariations);
        assert_eq!(
            payload.reference_image_url.as_deref(),
            Some("https://img/source.png")
        );

        // Recreate mode never looks at the source image column.
        let raw = fields(json!({ "Source Image": [{ "url": "https://img/source.png" }] }));
        assert_eq!(payload_for(&raw, Mode::Recreate).reference_image_url, None);
    }

    #[test]
    fn image_key_omitted_when_nothing_resolves() {
        let raw = fields(json!({ "Reference Image": [] }));
        let body = serde_json::to_value(payload_for(&raw, Mode::Recreate)).unwrap();
        assert!(body.get("reference_image_url").is_none());
    }

    #[test]
    fn poses_are_trimmed_and_blank_lines_dropped() {
        let raw = fields(json!({ "Poses": "A\nB\n\nC" }));
        let payload = payload_for(&raw, Mode::PoseVariations);
        assert_eq!(
            payload.poses,
            Some(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn whitespace_variants_normalize_to_same_poses() {
        let variants = [
            "A\nB\nC",
            "  A  \n\tB\n\n\nC\n",
            "\r\nA\r\nB \r\n \r\nC",
        ];
        for text in variants {
            assert_eq!(parse_poses(text), vec!["A", "B", "C"], "variant {:?}", text);
        }
    }

    #[test]
    fn empty_pose_list_omits_key() {
        let raw = fields(json!({ "Poses": " \n \n" }));
        let body = serde_json::to_value(payload_for(&raw, Mode::PoseVariations)).unwrap();
        assert!(body.get("poses").is_none());
    }

    #[test]
    fn recreate_mode_ignores_poses() {
        let raw = fields(json!({ "Poses": "A\nB" }));
        assert_eq!(payload_for(&raw, Mode::Recreate).poses, None);
    }

    #[test]
    fn metadata_and_webhook_embedded() {
        let raw = Fields::new();
        let payload = build_job_payload(
            "rec9",
            &RecordFields::new(&raw),
            Mode::PoseVariations,
            "Pose Variations",
            WEBHOOK,
        );
        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["webhook_url"], WEBHOOK);
        assert_eq!(body["mode"], "pose_variations");
        assert_eq!(
            body["metadata"],
            json!({
                "airtable_record_id": "rec9",
                "table": "Pose Variations",
                "mode": "pose_variations"
            })
        );
    }

    #[test]
    fn build_is_pure() {
        let raw = fields(json!({
            "Prompt": "x",
            "Poses": "one\ntwo",
            "Source Image": [{ "url": "https://img/s.png" }],
        }));
        let before = raw.clone();
        let a = payload_for(&raw, Mode::PoseVariations);
        let b = payload_for(&raw, Mode::PoseVariations);
        assert_eq!(a, b);
        assert_eq!(raw, before);
    }
}
