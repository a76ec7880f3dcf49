//! Fleet State - derived state from the fleet's push channels
//!
//! Four stream processors, one per channel domain:
//!
//! - [`PositionTracker`]: bounded per-vehicle sample buffers, liveness, sample rate
//! - [`StatusTracker`]: last-applied shipment status, arrival order wins
//! - [`NotificationTracker`]: newest-first alert ring with an unread counter
//! - [`ConversationTracker`]: ordered, de-duplicated assistant conversation
//!
//! Each processor is a synchronous reducer over [`push_channel::PushMessage`]s.
//! [`LiveChannels`] binds them to reconnecting channels and keeps every timer
//! scoped to the channel that owns it.

pub mod conversation;
mod error;
pub mod live;
pub mod liveness;
pub mod notification;
mod payload;
pub mod position;
mod processor;
pub mod status;
mod tracker;

pub use conversation::{
    Author, ConversationEvent, ConversationState, ConversationTracker, ConversationTurn, reduce,
};
pub use error::DecodeError;
pub use live::{ChannelFeed, LiveChannels, TrackingSettings};
pub use liveness::LivenessTicker;
pub use notification::{NotificationRecord, NotificationTracker, Severity};
pub use position::{
    Liveness, LivenessChange, LivenessThresholds, PositionSample, PositionTracker, RouteSummary,
    TrackedEntity,
};
pub use processor::StreamProcessor;
pub use status::{ShipmentStatus, StatusTracker, StatusUpdate};
pub use tracker::{Clock, Tracker, system_clock};
