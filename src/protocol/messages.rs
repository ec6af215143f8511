//! Envelope message types
//!
//! Wire representation:
//! `{"type": "<STRING>", "payload": {...}, "meta": {"timestamp": "<ISO8601>", "correlation": "<uuid>"}}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Channel-internal heartbeat probe type.
pub const HEARTBEAT: &str = "heartbeat";
/// Channel-internal heartbeat acknowledgment type.
pub const HEARTBEAT_ACK: &str = "heartbeat_ack";

/// The typed message unit exchanged over the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message type. Application types are opaque to the channel; the two
    /// heartbeat control types are intercepted and suppressed.
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form string-keyed payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
}

/// Optional envelope metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMeta {
    pub timestamp: DateTime<Utc>,
    /// Correlates a heartbeat acknowledgment with the probe that caused it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

impl Envelope {
    /// Build an application envelope with a fresh timestamp.
    pub fn application(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            meta: Some(EnvelopeMeta {
                timestamp: Utc::now(),
                correlation: None,
            }),
        }
    }

    /// Build a heartbeat probe with a fresh correlation id.
    pub fn heartbeat() -> Self {
        Self {
            kind: HEARTBEAT.to_string(),
            payload: Map::new(),
            meta: Some(EnvelopeMeta {
                timestamp: Utc::now(),
                correlation: Some(Uuid::new_v4().to_string()),
            }),
        }
    }

    /// Build a heartbeat acknowledgment echoing the probe's correlation id.
    pub fn heartbeat_ack(correlation: Option<String>) -> Self {
        Self {
            kind: HEARTBEAT_ACK.to_string(),
            payload: Map::new(),
            meta: Some(EnvelopeMeta {
                timestamp: Utc::now(),
                correlation,
            }),
        }
    }

    /// Correlation id carried in the metadata, if any.
    pub fn correlation(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.correlation.as_deref())
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a raw inbound frame. Malformed frames are the caller's problem
    /// to log and drop; they never escalate past this boundary.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("seat".to_string(), json!(3));
        payload.insert("card".to_string(), json!("queen_of_cups"));
        payload
    }

    #[test]
    fn test_application_envelope_roundtrip() {
        let envelope = Envelope::application("play_card", sample_payload());
        let wire = envelope.encode().unwrap();
        let parsed = Envelope::decode(&wire).unwrap();
        assert_eq!(parsed.kind, "play_card");
        assert_eq!(parsed.payload["seat"], json!(3));
        assert!(parsed.meta.is_some());
    }

    #[test]
    fn test_wire_format_uses_type_key() {
        let envelope = Envelope::application("chat", Map::new());
        let wire = envelope.encode().unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], json!("chat"));
        assert!(value["payload"].is_object());
        assert!(value["meta"]["timestamp"].is_string());
    }

    #[test]
    fn test_decode_without_meta_or_payload() {
        let parsed = Envelope::decode(r#"{"type": "noop"}"#).unwrap();
        assert_eq!(parsed.kind, "noop");
        assert!(parsed.payload.is_empty());
        assert!(parsed.meta.is_none());
    }

    #[test]
    fn test_decode_malformed_frame_fails() {
        assert!(Envelope::decode("not json at all").is_err());
        assert!(Envelope::decode(r#"{"payload": {}}"#).is_err()); // no type
    }

    #[test]
    fn test_heartbeat_carries_correlation() {
        let probe = Envelope::heartbeat();
        assert_eq!(probe.kind, HEARTBEAT);
        assert!(probe.correlation().is_some());
    }

    #[test]
    fn test_heartbeat_ack_echoes_correlation() {
        let probe = Envelope::heartbeat();
        let correlation = probe.correlation().map(str::to_string);
        let ack = Envelope::heartbeat_ack(correlation.clone());
        assert_eq!(ack.kind, HEARTBEAT_ACK);
        assert_eq!(ack.correlation(), correlation.as_deref());
    }
}
