//! Threat submissions and their normalization into block payloads.
//!
//! Submissions come from detectors or manual posts and may omit any field.
//! `into_payload` fills the gaps so that every threat block has the same
//! shape:
//!
//! ```json
//! {
//!   "id": "threat-1742364492669-vk8go90b5",
//!   "timestamp": "2025-03-19 11:36:53",
//!   "ip": "192.168.1.86",
//!   "attack_type": "Connection Attempt",
//!   "severity": "High",
//!   "status": "Detected",
//!   "details": {
//!     "user_agent": "Anomaly Detector/1.0",
//!     "method": "GET",
//!     "url_path": "/private",
//!     "source_port": 52949,
//!     "destination_port": 443,
//!     "protocol": "tcp",
//!     "flag": "REJ"
//!   }
//! }
//! ```

use crate::blockchain::{current_timestamp, Payload};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_IP: &str = "0.0.0.0";
pub const DEFAULT_ATTACK_TYPE: &str = "unknown";
pub const DEFAULT_SEVERITY: &str = "Low";
pub const DEFAULT_STATUS: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "N/A";
pub const DEFAULT_URL_PATH: &str = "/";

/// A threat report as submitted. Values are kept as raw JSON so that a
/// submitter's types survive into the block untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreatSubmission {
    pub id: Option<Value>,
    pub timestamp: Option<Value>,
    pub ip: Option<Value>,
    pub attack_type: Option<Value>,
    pub severity: Option<Value>,
    pub status: Option<Value>,
    #[serde(default)]
    pub details: Option<ThreatDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreatDetails {
    pub user_agent: Option<Value>,
    pub method: Option<Value>,
    pub url_path: Option<Value>,
    pub source_port: Option<Value>,
    pub destination_port: Option<Value>,
    pub protocol: Option<Value>,
    pub flag: Option<Value>,
}

/// Id given to submissions that arrive without one.
pub fn generate_threat_id() -> String {
    let now = chrono::Utc::now();
    format!(
        "threat-{}.{:06}",
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

fn or_default(value: Option<Value>, default: impl Into<Value>) -> Value {
    value.unwrap_or_else(|| default.into())
}

impl ThreatSubmission {
    /// Normalize into the standard threat payload. Fields outside the
    /// standard shape are dropped.
    pub fn into_payload(self) -> Payload {
        let details = self.details.unwrap_or_default();

        let mut detail_fields = Payload::new();
        detail_fields.insert("user_agent".into(), or_default(details.user_agent, NOT_AVAILABLE));
        detail_fields.insert("method".into(), or_default(details.method, NOT_AVAILABLE));
        detail_fields.insert("url_path".into(), or_default(details.url_path, DEFAULT_URL_PATH));
        detail_fields.insert("source_port".into(), or_default(details.source_port, 0));
        detail_fields.insert("destination_port".into(), or_default(details.destination_port, 0));
        detail_fields.insert("protocol".into(), or_default(details.protocol, NOT_AVAILABLE));
        detail_fields.insert("flag".into(), or_default(details.flag, NOT_AVAILABLE));

        let mut payload = Payload::new();
        payload.insert("id".into(), self.id.unwrap_or_else(|| generate_threat_id().into()));
        payload.insert(
            "timestamp".into(),
            self.timestamp.unwrap_or_else(|| current_timestamp().into()),
        );
        payload.insert("ip".into(), or_default(self.ip, DEFAULT_IP));
        payload.insert("attack_type".into(), or_default(self.attack_type, DEFAULT_ATTACK_TYPE));
        payload.insert("severity".into(), or_default(self.severity, DEFAULT_SEVERITY));
        payload.insert("status".into(), or_default(self.status, DEFAULT_STATUS));
        payload.insert("details".into(), Value::Object(detail_fields));
        payload
    }
}
