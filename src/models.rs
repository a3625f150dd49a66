use crate::entities::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single accepted entity, anchored to the original text.
///
/// Invariant: `original[begin..end] == value` (character offsets, not
/// byte offsets). No two accepted entities in one list overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub label: Label,
    pub value: String,
    pub begin: usize,
    pub end: usize,
}

impl Entity {
    pub fn overlaps(&self, other: &Entity) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn range_overlaps(&self, begin: usize, end: usize) -> bool {
        self.begin < end && begin < self.end
    }
}

/// Where an accepted entity's span information originated. Not persisted —
/// consumed only by the alert-string builder, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Regex,
    Llm,
}

/// An entity plus its provenance tag, used internally between the span
/// merger and the alert builder.
#[derive(Debug, Clone)]
pub struct TaggedEntity {
    pub entity: Entity,
    pub provenance: Provenance,
}

/// Inbound attachment descriptor (wire format: base64 `data`).
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentIn {
    pub format: String,
    pub data: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Decoded attachment: the base64 boundary exists only at the wire edge —
/// everywhere else this is a byte buffer plus metadata.
#[derive(Debug, Clone)]
pub struct RawAttachment {
    pub ext: String,
    pub bytes: Vec<u8>,
}

/// Inbound request body for `POST /api/logs`.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectRequest {
    pub time: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub host: Option<String>,
    #[serde(alias = "pc_name", alias = "pcName", alias = "PCName", alias = "hostname")]
    pub pc_name: Option<String>,
    pub prompt: String,
    pub attachment: Option<AttachmentIn>,
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_interface() -> String {
    "llm".to_string()
}

/// File descriptor for a saved attachment.
#[derive(Debug, Clone)]
pub struct SavedFileInfo {
    pub ext: String,
    pub mime: String,
    pub path: std::path::PathBuf,
}

/// Final policy verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    MaskAndAllow,
    AllowSensitive,
    BlockSensitive,
    BlockFileSensitive,
    BlockUploadSimilar,
    AllowUnmonitored,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::MaskAndAllow => "mask_and_allow",
            Action::AllowSensitive => "allow_sensitive",
            Action::BlockSensitive => "block_sensitive",
            Action::BlockFileSensitive => "block_file_sensitive",
            Action::BlockUploadSimilar => "block_upload_similar",
            Action::AllowUnmonitored => "allow_unmonitored",
        }
    }
}

impl Serialize for Action {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Response method configured by the admin policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMethod {
    Mask,
    Allow,
    Block,
}

impl Default for ResponseMethod {
    fn default() -> Self {
        ResponseMethod::Mask
    }
}

/// Per-interface, per-service on/off flags.
pub type ServiceFilter = std::collections::HashMap<String, bool>;

/// Read-only view of the admin-configured policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub response_method: ResponseMethod,
    pub service_filters: std::collections::HashMap<String, ServiceFilter>,
    pub version: i64,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        PolicySnapshot {
            response_method: ResponseMethod::Mask,
            service_filters: std::collections::HashMap::new(),
            version: 1,
        }
    }
}

/// One persisted record per request.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub request_id: String,
    pub time: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub host: Option<String>,
    pub hostname: Option<String>,
    pub prompt: String,
    pub attachment: Option<serde_json::Value>,
    pub interface: String,
    pub modified_prompt: String,
    pub has_sensitive: bool,
    pub entities: Vec<Entity>,
    pub processing_ms: u64,
    pub file_blocked: bool,
    pub allow: bool,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

/// The `POST /api/logs` response body.
#[derive(Debug, Clone, Serialize)]
pub struct InspectResponse {
    pub request_id: String,
    pub host: Option<String>,
    pub modified_prompt: String,
    pub has_sensitive: bool,
    pub entities: Vec<Entity>,
    pub processing_ms: u64,
    pub file_blocked: bool,
    pub allow: bool,
    pub action: Action,
    pub alert: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentOut>,
}

/// Outbound attachment: the processed bytes, base64-encoded at the wire
/// edge only.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentOut {
    pub format: String,
    pub data: String,
    pub file_change: bool,
}
