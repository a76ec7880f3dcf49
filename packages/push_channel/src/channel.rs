//! Channel identity.
//!
//! One key per logical push feed: the three fleet-wide domains plus one
//! channel per active assistant conversation.

use std::fmt;
use std::str::FromStr;

use crate::envelope::MessageKind;
use crate::error::ChannelError;

const CONVERSATION_PREFIX: &str = "ai:";

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelKey {
    /// Vehicle position updates
    Gps,
    /// Shipment status transitions
    Shipments,
    /// System notifications
    Notifications,
    /// Assistant turns for one conversation id
    Conversation(String),
}

impl ChannelKey {
    pub fn conversation(id: impl Into<String>) -> Self {
        ChannelKey::Conversation(id.into())
    }

    /// Path of the push endpoint serving this channel, relative to the API base URL.
    pub fn endpoint_path(&self) -> String {
        match self {
            ChannelKey::Gps => "/api/gps/stream".to_string(),
            ChannelKey::Shipments => "/api/shipments/stream".to_string(),
            ChannelKey::Notifications => "/api/notifications/stream".to_string(),
            ChannelKey::Conversation(id) => format!("/api/ai/conversations/{}/stream", id),
        }
    }

    /// The message tag this channel is expected to carry.
    pub fn expected_kind(&self) -> MessageKind {
        match self {
            ChannelKey::Gps => MessageKind::GpsLocationUpdate,
            ChannelKey::Shipments => MessageKind::ShipmentStatusUpdate,
            ChannelKey::Notifications => MessageKind::Notification,
            ChannelKey::Conversation(_) => MessageKind::AiMessage,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ChannelKey::Conversation(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Gps => write!(f, "gps"),
            ChannelKey::Shipments => write!(f, "shipments"),
            ChannelKey::Notifications => write!(f, "notifications"),
            ChannelKey::Conversation(id) => write!(f, "{}{}", CONVERSATION_PREFIX, id),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(ChannelKey::Gps),
            "shipments" => Ok(ChannelKey::Shipments),
            "notifications" => Ok(ChannelKey::Notifications),
            other => match other.strip_prefix(CONVERSATION_PREFIX) {
                Some(id) if !id.is_empty() => Ok(ChannelKey::Conversation(id.to_string())),
                _ => Err(ChannelError::Malformed(format!("unknown channel key: {}", s))),
            },
        }
    }
}
