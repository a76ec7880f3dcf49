//! Transport seam between connection lifecycle and the wire.
//!
//! A transport turns a [`ChannelKey`] into a stream of raw frames. The
//! connection manager owns parsing, retry and lifecycle; transports only
//! connect and read.

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::channel::ChannelKey;
use crate::error::ChannelError;

/// Raw frames from an established connection. An `Err` item or the end of the
/// stream both mean the connection is gone.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

pub trait PushTransport: Send + Sync + 'static {
    fn connect<'a>(&'a self, key: &'a ChannelKey)
    -> BoxFuture<'a, Result<FrameStream, ChannelError>>;
}

/// Source of the bearer credential attached to each connection attempt.
///
/// Called on every attempt, never cached, so a credential rotated between
/// attempts is picked up by the next reconnect.
pub trait CredentialSource: Send + Sync + 'static {
    fn bearer(&self) -> Option<String>;
}

/// A credential fixed at construction.
#[derive(Clone, Debug)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

impl CredentialSource for StaticCredential {
    fn bearer(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A credential that can be replaced in place, e.g. after a token refresh.
#[derive(Clone, Debug, Default)]
pub struct SharedCredential {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedCredential {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    pub fn rotate(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl CredentialSource for SharedCredential {
    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: CredentialSource> CredentialSource for Arc<T> {
    fn bearer(&self) -> Option<String> {
        (**self).bearer()
    }
}
