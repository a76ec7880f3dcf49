use chrono::{DateTime, Utc};
use push_channel::{MessageKind, PushMessage};

use crate::error::DecodeError;

/// Derived state fed by the messages of one channel.
///
/// Processors are plain synchronous reducers: they own their state, never
/// block, and know nothing about the connection that feeds them.
pub trait StreamProcessor: Send + 'static {
    /// Message kind this processor consumes; every other kind is ignored.
    const KIND: MessageKind;

    /// Fold one message into the state. `now` is the wall-clock arrival time.
    ///
    /// An `Err` means the payload was malformed and nothing changed.
    fn process(&mut self, message: &PushMessage, now: DateTime<Utc>) -> Result<(), DecodeError>;
}
