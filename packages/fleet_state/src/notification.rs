//! Notification Tracker
//!
//! A newest-first ring of alerts with an unread counter. The counter, not the
//! per-record `read` flag, is what badges show: `mark_all_read` zeroes it
//! without touching the records.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use push_channel::{MessageKind, PushMessage};
use serde::Serialize;

use crate::error::DecodeError;
use crate::payload::Payload;
use crate::processor::StreamProcessor;

pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Severity {
    /// Unknown values fall back to `Normal`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "urgent" | "critical" => Severity::Urgent,
            _ => Severity::Normal,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Normal => "normal",
            Severity::High => "high",
            Severity::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl NotificationRecord {
    pub fn from_message(message: &PushMessage) -> Result<Self, DecodeError> {
        let p = Payload::of(message)?;

        let title = p.require_text("title", &["title"])?;
        let body = p.text(&["body", "message", "content"]).unwrap_or_default();
        let severity = p
            .text(&["severity", "priority"])
            .map(|s| Severity::parse(&s))
            .unwrap_or_default();
        let id = p
            .text(&["id", "notification_id"])
            .or_else(|| message.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Self {
            id,
            title,
            body,
            severity,
            timestamp: p.timestamp("timestamp")?.unwrap_or(message.timestamp),
            read: false,
        })
    }
}

pub struct NotificationTracker {
    records: VecDeque<NotificationRecord>,
    capacity: usize,
    unread: usize,
}

impl Default for NotificationTracker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NotificationTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            unread: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend `record`, evicting the oldest past capacity. Every arrival
    /// counts as unread.
    pub fn apply(&mut self, record: NotificationRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
        self.unread += 1;
    }

    pub fn mark_all_read(&mut self) {
        self.unread = 0;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.unread = 0;
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Stored records, newest first.
    pub fn records(&self) -> impl ExactSizeIterator<Item = &NotificationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest severity among stored records.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.records.iter().map(|r| r.severity).max()
    }
}

impl StreamProcessor for NotificationTracker {
    const KIND: MessageKind = MessageKind::Notification;

    fn process(&mut self, message: &PushMessage, _now: DateTime<Utc>) -> Result<(), DecodeError> {
        self.apply(NotificationRecord::from_message(message)?);
        Ok(())
    }
}
