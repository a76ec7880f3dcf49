//! ConnectionManager: one reconnecting push connection bound to one channel.
//!
//! Lifecycle: `Connecting -> Open -> Closed`. A transport failure from
//! `Connecting` or `Open` moves to `Closed` and, unless the manager was
//! disposed, schedules a reconnect after `BackoffPolicy::delay_for(retry_count)`.
//! The retry count resets to 0 on every successful open. Once the retry budget
//! is spent the channel stays `Closed` until `reopen()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::channel::ChannelKey;
use crate::envelope::PushMessage;
use crate::error::ChannelError;
use crate::transport::{FrameStream, PushTransport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub channel_key: ChannelKey,
    pub status: ConnectionStatus,
    /// Consecutive failed attempts since the last successful open
    pub retry_count: u32,
    /// True once the retry budget is spent; the channel stays closed
    pub exhausted: bool,
}

/// Receives lifecycle notifications and parsed messages for a channel.
///
/// Callbacks run on the connection's task, one at a time and in arrival order.
/// None fire after the manager is disposed.
pub trait ChannelHandler: Send + Sync + 'static {
    fn on_connecting(&self, _key: &ChannelKey, _retry_count: u32) {}

    fn on_open(&self, _key: &ChannelKey) {}

    fn on_message(&self, key: &ChannelKey, message: PushMessage);

    fn on_error(&self, _key: &ChannelKey, _error: &ChannelError) {}

    fn on_close(&self, _key: &ChannelKey) {}
}

struct Shared {
    key: ChannelKey,
    transport: Arc<dyn PushTransport>,
    handler: Arc<dyn ChannelHandler>,
    policy: BackoffPolicy,
    state: watch::Sender<ConnectionState>,
    manual_close: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Publish a state change from the connection task. A no-op once the
    /// manager is disposed, so `Closed` is the last state a disposed manager
    /// ever reports. The check runs under the watch lock `dispose` writes
    /// through.
    fn publish(&self, change: impl FnOnce(&mut ConnectionState)) -> bool {
        self.state.send_if_modified(|s| {
            if self.manual_close.load(Ordering::SeqCst) {
                return false;
            }
            change(s);
            true
        })
    }

    fn set_status(&self, status: ConnectionStatus, retry_count: u32) -> bool {
        self.publish(|s| {
            s.status = status;
            s.retry_count = retry_count;
        })
    }
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create the manager and start connecting on the current tokio runtime.
    pub fn open(
        key: ChannelKey,
        transport: Arc<dyn PushTransport>,
        policy: BackoffPolicy,
        handler: Arc<dyn ChannelHandler>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState {
            channel_key: key.clone(),
            status: ConnectionStatus::Connecting,
            retry_count: 0,
            exhausted: false,
        });

        let shared = Arc::new(Shared {
            key,
            transport,
            handler,
            policy,
            state,
            manual_close: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let task = tokio::spawn(run(shared.clone()));

        Arc::new(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.shared.key
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.borrow().status
    }

    /// Watch every state change of this channel.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.manual_close.load(Ordering::SeqCst)
    }

    /// A token cancelled when this channel is disposed. Timers owned by the
    /// channel's consumers hang off it so they cannot outlive the channel.
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.child_token()
    }

    /// Wait for the channel to be open.
    pub async fn wait_open(&self) -> Result<(), ChannelError> {
        let mut rx = self.shared.state.subscribe();
        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(ChannelError::Disposed),
            result = rx.wait_for(|s| s.status == ConnectionStatus::Open || s.exhausted) => {
                match result {
                    Ok(state) if state.status == ConnectionStatus::Open => Ok(()),
                    Ok(state) => Err(ChannelError::ExhaustedRetries {
                        attempts: state.retry_count,
                    }),
                    Err(_) => Err(ChannelError::Disposed),
                }
            }
        }
    }

    /// Restart a channel that gave up after exhausting its retries.
    ///
    /// Returns false if the manager is disposed or still running.
    pub fn reopen(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let running = task.as_ref().is_some_and(|t| !t.is_finished());
        if running && !self.state().exhausted {
            return false;
        }

        info!(channel = %self.shared.key, "reopening channel");
        let reset = self.shared.publish(|s| {
            s.status = ConnectionStatus::Connecting;
            s.retry_count = 0;
            s.exhausted = false;
        });
        if !reset {
            return false;
        }
        *task = Some(tokio::spawn(run(self.shared.clone())));
        true
    }

    /// Close the channel for good. Cancels any pending reconnect timer and
    /// suppresses every further callback. Safe to call more than once.
    pub fn dispose(&self) {
        if self.shared.manual_close.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.cancel.cancel();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.shared
            .state
            .send_modify(|s| s.status = ConnectionStatus::Closed);

        info!(channel = %self.shared.key, "channel disposed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Connection task: connect, pump frames, back off, repeat.
async fn run(shared: Arc<Shared>) {
    let key = &shared.key;
    let mut retry_count = shared.state.borrow().retry_count;

    loop {
        if !shared.is_live() {
            return;
        }

        if !shared.set_status(ConnectionStatus::Connecting, retry_count) {
            return;
        }
        debug!(channel = %key, retry = retry_count, "connecting");
        shared.handler.on_connecting(key, retry_count);

        let attempt = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            result = shared.transport.connect(key) => result,
        };

        let failure = match attempt {
            Err(err) => err,
            Ok(frames) => {
                retry_count = 0;
                if !shared.is_live() || !shared.set_status(ConnectionStatus::Open, 0) {
                    return;
                }
                info!(channel = %key, "channel open");
                shared.handler.on_open(key);

                match pump(&shared, frames).await {
                    Some(err) => err,
                    None => return,
                }
            }
        };

        if !shared.is_live() {
            return;
        }

        warn!(channel = %key, retry = retry_count, error = %failure, "channel closed");
        if !shared.set_status(ConnectionStatus::Closed, retry_count) {
            return;
        }
        shared.handler.on_error(key, &failure);
        shared.handler.on_close(key);

        if shared.policy.exhausted(retry_count) {
            let err = ChannelError::ExhaustedRetries {
                attempts: retry_count,
            };
            warn!(channel = %key, retry = retry_count, "giving up on channel");
            shared.handler.on_error(key, &err);
            shared.publish(|s| s.exhausted = true);
            return;
        }

        let delay = shared.policy.delay_for(retry_count);
        debug!(
            channel = %key,
            retry = retry_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        retry_count = retry_count.saturating_add(1);
    }
}

/// Forward frames until the connection fails. Returns `None` when cancelled.
async fn pump(shared: &Shared, mut frames: FrameStream) -> Option<ChannelError> {
    let key = &shared.key;
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return None,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => match PushMessage::parse(&frame) {
                Ok(message) => {
                    if !shared.is_live() {
                        return None;
                    }
                    shared.handler.on_message(key, message);
                }
                Err(err) => {
                    warn!(channel = %key, error = %err, "dropping malformed frame");
                    if !shared.is_live() {
                        return None;
                    }
                    shared.handler.on_error(key, &err);
                }
            },
            Some(Err(err)) => return Some(err),
            None => return Some(ChannelError::transport("stream ended")),
        }
    }
}
