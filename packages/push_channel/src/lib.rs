//! Push Channel - server-push connection lifecycle library
//!
//! This crate keeps long-lived, server-pushed data feeds alive. Each feed is a
//! [`ConnectionManager`] bound to one [`ChannelKey`]; it connects through a
//! [`PushTransport`], forwards parsed [`PushMessage`]s to a caller-supplied
//! [`ChannelHandler`], and reconnects with capped exponential backoff when the
//! transport fails. A [`ChannelRegistry`] multiplexes any number of managers
//! and aggregates their health.
//!
//! It has no knowledge of what the messages mean; domain processing lives in
//! the consumers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use push_channel::{
//!     BackoffPolicy, ChannelHandler, ChannelKey, ChannelRegistry, ConnectionManager,
//!     PushMessage, SharedCredential, SseTransport,
//! };
//!
//! struct Printer;
//!
//! impl ChannelHandler for Printer {
//!     fn on_message(&self, key: &ChannelKey, message: PushMessage) {
//!         println!("{}: {}", key, message.kind);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let credential = SharedCredential::new(Some("token".to_string()));
//!     let transport = Arc::new(SseTransport::new("http://127.0.0.1:8000", credential));
//!     let registry = ChannelRegistry::new();
//!
//!     let manager = registry.get_or_create(ChannelKey::Gps, |key| {
//!         ConnectionManager::open(
//!             key.clone(),
//!             transport.clone(),
//!             BackoffPolicy::default(),
//!             Arc::new(Printer),
//!         )
//!     });
//!
//!     manager.wait_open().await.unwrap();
//!     println!("{:?}", registry.status_snapshot());
//!     registry.dispose_all();
//! }
//! ```

pub mod backoff;
pub mod channel;
mod connection;
pub mod envelope;
mod error;
mod registry;
pub mod sse;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use channel::ChannelKey;
pub use connection::{ChannelHandler, ConnectionManager, ConnectionState, ConnectionStatus};
pub use envelope::{MessageKind, PushMessage};
pub use error::ChannelError;
pub use registry::{ChannelRegistry, StatusSnapshot};
pub use sse::SseTransport;
pub use transport::{
    CredentialSource, FrameStream, PushTransport, SharedCredential, StaticCredential,
};
