//! Wire envelope for pushed messages.
//!
//! Every frame on every channel is a JSON object:
//!
//! ```text
//! { "type": "<tag>", "data": { ... }, "timestamp": "<ISO-8601>", "id": "<optional>" }
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Message tags understood by the fleet processors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GpsLocationUpdate,
    ShipmentStatusUpdate,
    Notification,
    AiMessage,
    /// Anything else. Consumers ignore these silently.
    Other(String),
}

impl MessageKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "gps_location_update" => MessageKind::GpsLocationUpdate,
            "shipment_status_update" => MessageKind::ShipmentStatusUpdate,
            "notification" => MessageKind::Notification,
            "ai_message" => MessageKind::AiMessage,
            other => MessageKind::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            MessageKind::GpsLocationUpdate => "gps_location_update",
            MessageKind::ShipmentStatusUpdate => "shipment_status_update",
            MessageKind::Notification => "notification",
            MessageKind::AiMessage => "ai_message",
            MessageKind::Other(tag) => tag,
        }
    }
}

/// The unit of data arriving on a channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    timestamp: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>, data: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse one raw frame. Any structural problem is `ChannelError::Malformed`.
    pub fn parse(frame: &str) -> Result<Self, ChannelError> {
        let raw: RawEnvelope = serde_json::from_str(frame)?;

        let kind = raw
            .kind
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ChannelError::malformed("missing \"type\""))?;
        let timestamp = raw
            .timestamp
            .ok_or_else(|| ChannelError::malformed("missing \"timestamp\""))?;
        let timestamp = parse_timestamp(&timestamp)
            .ok_or_else(|| ChannelError::Malformed(format!("bad timestamp: {}", timestamp)))?;

        Ok(Self {
            kind,
            data: raw.data,
            timestamp,
            id: raw.id,
        })
    }

    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_tag(&self.kind)
    }

    /// Serialize back into a wire frame.
    pub fn to_frame(&self) -> String {
        // Serializing a Value tree with string keys cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are taken as UTC, which is
/// what the backend emits.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_envelope() {
        let msg = PushMessage::parse(
            r#"{"type":"notification","data":{"title":"hi"},"timestamp":"2024-05-01T10:00:00Z","id":"n-1"}"#,
        )
        .unwrap();
        assert_eq!(msg.message_kind(), MessageKind::Notification);
        assert_eq!(msg.data, json!({"title": "hi"}));
        assert_eq!(msg.id.as_deref(), Some("n-1"));
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let msg = PushMessage::parse(
            r#"{"type":"gps_location_update","data":{},"timestamp":"2024-05-01T10:00:00.250000"}"#,
        )
        .unwrap();
        assert_eq!(msg.timestamp.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn missing_fields_are_malformed() {
        for frame in [
            r#"{"data":{},"timestamp":"2024-05-01T10:00:00Z"}"#,
            r#"{"type":"notification","data":{}}"#,
            r#"{"type":"notification","timestamp":"yesterday"}"#,
            r#"not json"#,
        ] {
            assert!(
                matches!(PushMessage::parse(frame), Err(ChannelError::Malformed(_))),
                "{frame}"
            );
        }
    }

    #[test]
    fn data_defaults_to_null() {
        let msg = PushMessage::parse(r#"{"type":"ping","timestamp":"2024-05-01T10:00:00Z"}"#)
            .unwrap();
        assert!(msg.data.is_null());
        assert_eq!(msg.message_kind(), MessageKind::Other("ping".to_string()));
    }

    #[test]
    fn frame_round_trips_through_parse() {
        let ts = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let msg = PushMessage::new("ai_message", json!({"content": "ok"}), ts).with_id("t1");
        assert_eq!(PushMessage::parse(&msg.to_frame()).unwrap(), msg);
    }
}
