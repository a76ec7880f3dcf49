//! In-memory transport for driving connections from tests.
//!
//! Each connect attempt for a key consumes the next scripted outcome for that
//! key: either a refusal or an accepted connection whose frames are fed through
//! a [`FrameSender`]. An attempt with nothing scripted is refused.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::channel::ChannelKey;
use crate::envelope::PushMessage;
use crate::error::ChannelError;
use crate::transport::{CredentialSource, FrameStream, PushTransport};

type FrameItem = Result<String, ChannelError>;

enum Script {
    Refuse(String),
    Accept(mpsc::UnboundedReceiver<FrameItem>),
}

/// One recorded connect attempt.
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    pub key: ChannelKey,
    pub at: Instant,
    pub bearer: Option<String>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<ChannelKey, VecDeque<Script>>>,
    attempts: Mutex<Vec<AttemptRecord>>,
    credentials: Option<Box<dyn CredentialSource>>,
    latency: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the credential value seen by every attempt.
    pub fn with_credentials(credentials: impl CredentialSource) -> Arc<Self> {
        Arc::new(Self {
            credentials: Some(Box::new(credentials)),
            ..Default::default()
        })
    }

    /// Make every later attempt take `latency` before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Queue a refused attempt for `key`.
    pub fn refuse(&self, key: &ChannelKey, reason: &str) {
        self.push(key, Script::Refuse(reason.to_string()));
    }

    /// Queue an accepted attempt for `key` and return the feed for it.
    pub fn accept(&self, key: &ChannelKey) -> FrameSender {
        let (tx, rx) = mpsc::unbounded();
        self.push(key, Script::Accept(rx));
        FrameSender { tx }
    }

    pub fn attempts(&self, key: &ChannelKey) -> Vec<AttemptRecord> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| &a.key == key)
            .cloned()
            .collect()
    }

    fn push(&self, key: &ChannelKey, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push_back(script);
    }
}

impl PushTransport for ScriptedTransport {
    fn connect<'a>(
        &'a self,
        key: &'a ChannelKey,
    ) -> BoxFuture<'a, Result<FrameStream, ChannelError>> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AttemptRecord {
                key: key.clone(),
                at: Instant::now(),
                bearer: self.credentials.as_ref().and_then(|c| c.bearer()),
            });

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
            .and_then(|queue| queue.pop_front());

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match next {
                Some(Script::Accept(rx)) => Ok(rx.boxed()),
                Some(Script::Refuse(reason)) => Err(ChannelError::Transport(reason)),
                None => Err(ChannelError::transport("no scripted connection")),
            }
        })
    }
}

/// Server side of one scripted connection.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<FrameItem>,
}

impl FrameSender {
    pub fn send(&self, message: &PushMessage) {
        self.send_raw(&message.to_frame());
    }

    pub fn send_raw(&self, frame: &str) {
        let _ = self.tx.unbounded_send(Ok(frame.to_string()));
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.unbounded_send(Err(ChannelError::Transport(reason.to_string())));
    }

    /// End the stream cleanly, as a server closing the response would.
    pub fn close(&self) {
        self.tx.close_channel();
    }

    /// Whether the client still holds the connection.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
