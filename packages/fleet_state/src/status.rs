//! Status Tracker
//!
//! Last-applied shipment status per shipment. Arrival order wins: the
//! channel delivers each shipment's transitions in causal order, so an update
//! always overwrites, whatever its embedded timestamp says.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use push_channel::{MessageKind, PushMessage};
use serde::Serialize;
use tracing::debug;

use crate::error::DecodeError;
use crate::payload::Payload;
use crate::processor::StreamProcessor;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum ShipmentStatus {
    Unassigned,
    Assigned,
    Dispatched,
    InTransit,
    AtPickup,
    Loaded,
    Delivered,
    /// A status this client does not know yet. Still stored.
    Other(String),
}

impl ShipmentStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "unassigned" => ShipmentStatus::Unassigned,
            "assigned" => ShipmentStatus::Assigned,
            "dispatched" => ShipmentStatus::Dispatched,
            "in-transit" => ShipmentStatus::InTransit,
            "at-pickup" => ShipmentStatus::AtPickup,
            "loaded" => ShipmentStatus::Loaded,
            "delivered" => ShipmentStatus::Delivered,
            _ => ShipmentStatus::Other(s.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ShipmentStatus::Unassigned => "unassigned",
            ShipmentStatus::Assigned => "assigned",
            ShipmentStatus::Dispatched => "dispatched",
            ShipmentStatus::InTransit => "in-transit",
            ShipmentStatus::AtPickup => "at-pickup",
            ShipmentStatus::Loaded => "loaded",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ShipmentStatus> for String {
    fn from(status: ShipmentStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub shipment_id: String,
    pub status: ShipmentStatus,
    pub previous_status: Option<ShipmentStatus>,
    /// Embedded timestamp; informational only
    pub timestamp: DateTime<Utc>,
    /// Wall clock when the update was applied
    pub received_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn from_message(message: &PushMessage, now: DateTime<Utc>) -> Result<Self, DecodeError> {
        let p = Payload::of(message)?;
        let shipment_id = p.require_text("shipment_id", &["shipment_id", "id"])?;
        let status = p.require_text("status", &["status", "new_status"])?;

        Ok(Self {
            shipment_id,
            status: ShipmentStatus::parse(&status),
            previous_status: p
                .text(&["previous_status", "old_status"])
                .map(|s| ShipmentStatus::parse(&s)),
            timestamp: p.timestamp("timestamp")?.unwrap_or(message.timestamp),
            received_at: now,
        })
    }
}

#[derive(Default)]
pub struct StatusTracker {
    statuses: HashMap<String, StatusUpdate>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `update` unconditionally. Returns the status it replaced.
    pub fn apply(&mut self, update: StatusUpdate) -> Option<ShipmentStatus> {
        self.statuses
            .insert(update.shipment_id.clone(), update)
            .map(|old| old.status)
    }

    pub fn status_of(&self, shipment_id: &str) -> Option<&ShipmentStatus> {
        self.statuses.get(shipment_id).map(|u| &u.status)
    }

    pub fn latest(&self, shipment_id: &str) -> Option<&StatusUpdate> {
        self.statuses.get(shipment_id)
    }

    /// Current status of every shipment, ordered by shipment id.
    pub fn statuses(&self) -> Vec<(&str, &ShipmentStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|(id, u)| (id.as_str(), &u.status))
            .collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

impl StreamProcessor for StatusTracker {
    const KIND: MessageKind = MessageKind::ShipmentStatusUpdate;

    fn process(&mut self, message: &PushMessage, now: DateTime<Utc>) -> Result<(), DecodeError> {
        let update = StatusUpdate::from_message(message, now)?;
        let shipment = update.shipment_id.clone();
        let to = update.status.clone();
        let from = self.apply(update);
        debug!(shipment = %shipment, from = ?from, to = %to, "shipment status");
        Ok(())
    }
}
