//! Wiring between push channels and stream processors.
//!
//! [`LiveChannels`] owns a channel registry and, for every open channel, the
//! processor fed by it. Closing a channel tears down its connection, its
//! timers and its tracked state together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use push_channel::{
    BackoffPolicy, ChannelError, ChannelHandler, ChannelKey, ChannelRegistry, ConnectionManager,
    PushMessage, PushTransport, StatusSnapshot,
};
use tracing::{debug, info, trace, warn};

use crate::conversation::ConversationTracker;
use crate::liveness::{self, LivenessTicker};
use crate::notification::{self, NotificationTracker};
use crate::position::{self, LivenessThresholds, PositionTracker};
use crate::processor::StreamProcessor;
use crate::status::StatusTracker;
use crate::tracker::{Clock, Tracker, system_clock};

/// Feeds one channel's messages into one processor.
pub struct ChannelFeed<P> {
    tracker: Tracker<P>,
    clock: Clock,
}

impl<P: StreamProcessor> ChannelFeed<P> {
    pub fn new(tracker: Tracker<P>, clock: Clock) -> Self {
        Self { tracker, clock }
    }
}

impl<P: StreamProcessor> ChannelHandler for ChannelFeed<P> {
    fn on_message(&self, key: &ChannelKey, message: PushMessage) {
        let kind = message.message_kind();
        if kind != key.expected_kind() || kind != P::KIND {
            trace!(channel = %key, kind = %message.kind, "ignoring message");
            return;
        }

        let now = (self.clock)();
        if let Err(err) = self.tracker.update(|p| p.process(&message, now)) {
            warn!(channel = %key, error = %err, "dropping malformed payload");
        }
    }

    fn on_error(&self, key: &ChannelKey, error: &ChannelError) {
        if let ChannelError::ExhaustedRetries { attempts } = error {
            warn!(channel = %key, attempts, "channel disconnected until reopened");
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackingSettings {
    pub backoff: BackoffPolicy,
    pub max_buffer_size: usize,
    pub liveness: LivenessThresholds,
    pub liveness_interval: Duration,
    pub notification_capacity: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_buffer_size: position::DEFAULT_MAX_BUFFER_SIZE,
            liveness: LivenessThresholds::default(),
            liveness_interval: liveness::DEFAULT_INTERVAL,
            notification_capacity: notification::DEFAULT_CAPACITY,
        }
    }
}

struct GpsSlot {
    tracker: Tracker<PositionTracker>,
    _ticker: LivenessTicker,
}

#[derive(Default)]
struct Slots {
    gps: Option<GpsSlot>,
    shipments: Option<Tracker<StatusTracker>>,
    notifications: Option<Tracker<NotificationTracker>>,
    conversations: HashMap<String, Tracker<ConversationTracker>>,
}

pub struct LiveChannels {
    registry: ChannelRegistry,
    transport: Arc<dyn PushTransport>,
    settings: TrackingSettings,
    clock: Clock,
    slots: Mutex<Slots>,
}

impl LiveChannels {
    pub fn new(transport: Arc<dyn PushTransport>, settings: TrackingSettings) -> Self {
        Self::with_clock(transport, settings, system_clock())
    }

    pub fn with_clock(
        transport: Arc<dyn PushTransport>,
        settings: TrackingSettings,
        clock: Clock,
    ) -> Self {
        Self {
            registry: ChannelRegistry::new(),
            transport,
            settings,
            clock,
            slots: Mutex::new(Slots::default()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, key: &ChannelKey) -> bool {
        self.registry.get(key).is_some()
    }

    fn connect<P: StreamProcessor>(
        &self,
        key: ChannelKey,
        tracker: &Tracker<P>,
    ) -> Arc<ConnectionManager> {
        let feed = Arc::new(ChannelFeed::new(tracker.clone(), self.clock.clone()));
        // a stale manager under this key would feed the old tracker
        self.registry.dispose(&key);
        self.registry.get_or_create(key, |key| {
            ConnectionManager::open(
                key.clone(),
                self.transport.clone(),
                self.settings.backoff.clone(),
                feed,
            )
        })
    }

    /// Open (or return the already open) gps channel and its position tracker.
    pub fn open_gps(&self) -> Tracker<PositionTracker> {
        let mut slots = self.slots();
        if let Some(gps) = &slots.gps {
            if self.is_live(&ChannelKey::Gps) {
                return gps.tracker.clone();
            }
        }

        let tracker = Tracker::new(PositionTracker::with_thresholds(
            self.settings.max_buffer_size,
            self.settings.liveness,
        ));
        let manager = self.connect(ChannelKey::Gps, &tracker);
        let ticker = LivenessTicker::spawn(
            tracker.clone(),
            self.settings.liveness_interval,
            manager.cancellation(),
            self.clock.clone(),
        );
        slots.gps = Some(GpsSlot {
            tracker: tracker.clone(),
            _ticker: ticker,
        });
        tracker
    }

    pub fn open_shipments(&self) -> Tracker<StatusTracker> {
        let mut slots = self.slots();
        if let Some(tracker) = &slots.shipments {
            if self.is_live(&ChannelKey::Shipments) {
                return tracker.clone();
            }
        }

        let tracker = Tracker::new(StatusTracker::new());
        self.connect(ChannelKey::Shipments, &tracker);
        slots.shipments = Some(tracker.clone());
        tracker
    }

    pub fn open_notifications(&self) -> Tracker<NotificationTracker> {
        let mut slots = self.slots();
        if let Some(tracker) = &slots.notifications {
            if self.is_live(&ChannelKey::Notifications) {
                return tracker.clone();
            }
        }

        let tracker = Tracker::new(NotificationTracker::with_capacity(
            self.settings.notification_capacity,
        ));
        self.connect(ChannelKey::Notifications, &tracker);
        slots.notifications = Some(tracker.clone());
        tracker
    }

    pub fn open_conversation(&self, conversation_id: &str) -> Tracker<ConversationTracker> {
        let key = ChannelKey::conversation(conversation_id);
        let mut slots = self.slots();
        if let Some(tracker) = slots.conversations.get(conversation_id) {
            if self.is_live(&key) {
                return tracker.clone();
            }
        }

        let tracker = Tracker::new(ConversationTracker::new(conversation_id));
        self.connect(key, &tracker);
        slots
            .conversations
            .insert(conversation_id.to_string(), tracker.clone());
        tracker
    }

    /// The connection behind `key`, if open.
    pub fn manager(&self, key: &ChannelKey) -> Option<Arc<ConnectionManager>> {
        self.registry.get(key)
    }

    /// Dispose a channel together with its tracker and timers.
    pub fn close(&self, key: &ChannelKey) -> bool {
        let closed = self.registry.dispose(key);
        let mut slots = self.slots();
        match key {
            ChannelKey::Gps => slots.gps = None,
            ChannelKey::Shipments => slots.shipments = None,
            ChannelKey::Notifications => slots.notifications = None,
            ChannelKey::Conversation(id) => {
                slots.conversations.remove(id);
            }
        }
        if closed {
            info!(channel = %key, "channel closed");
        }
        closed
    }

    pub fn close_all(&self) {
        self.registry.dispose_all();
        *self.slots() = Slots::default();
        debug!("all channels closed");
    }

    pub fn health(&self) -> StatusSnapshot {
        self.registry.status_snapshot()
    }

    pub fn open_keys(&self) -> Vec<ChannelKey> {
        self.registry.keys()
    }
}

impl Drop for LiveChannels {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, Utc};
    use push_channel::ConnectionStatus;
    use push_channel::testing::ScriptedTransport;
    use serde_json::json;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        "2025-01-27T10:00:00Z".parse::<DateTime<Utc>>().unwrap() + TimeDelta::seconds(secs)
    }

    fn settings() -> TrackingSettings {
        TrackingSettings {
            backoff: BackoffPolicy::new(Duration::from_secs(1), 3, None),
            ..Default::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn feed_ignores_foreign_tags_and_bad_payloads() {
        let transport = ScriptedTransport::new();
        let feed = transport.accept(&ChannelKey::Shipments);
        let live = LiveChannels::new(transport.clone(), settings());

        let statuses = live.open_shipments();
        live.manager(&ChannelKey::Shipments)
            .unwrap()
            .wait_open()
            .await
            .unwrap();

        feed.send(&PushMessage::new(
            "shipment_status_update",
            json!({"shipment_id": "S1", "status": "loaded"}),
            t(0),
        ));
        feed.send(&PushMessage::new("heartbeat", json!({}), t(1)));
        feed.send(&PushMessage::new(
            "shipment_status_update",
            json!({"status": "lost"}),
            t(2),
        ));
        settle().await;

        assert_eq!(statuses.read(|s| s.len()), 1);
        assert_eq!(
            statuses.read(|s| s.status_of("S1").cloned()),
            Some(crate::status::ShipmentStatus::Loaded)
        );
        assert_eq!(live.health().open_channels, 1);
    }

    #[test]
    fn feed_only_accepts_its_channels_kind() {
        let tracker = Tracker::new(PositionTracker::default());
        let feed = ChannelFeed::new(tracker.clone(), Arc::new(|| t(0)));
        let sample = PushMessage::new(
            "gps_location_update",
            json!({"vehicle_id": "V1", "latitude": 31.2, "longitude": 121.4}),
            t(0),
        );

        // right payload, wrong channel
        feed.on_message(&ChannelKey::Shipments, sample.clone());
        assert!(tracker.read(|p| p.is_empty()));

        feed.on_message(&ChannelKey::Gps, sample);
        assert_eq!(tracker.read(|p| p.len()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_twice_returns_the_same_tracker() {
        let transport = ScriptedTransport::new();
        let _feed = transport.accept(&ChannelKey::Notifications);
        let live = LiveChannels::new(transport.clone(), settings());

        let a = live.open_notifications();
        let b = live.open_notifications();
        assert!(a.same(&b));
        settle().await;
        assert_eq!(transport.attempts(&ChannelKey::Notifications).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drops_state_and_timers() {
        let transport = ScriptedTransport::new();
        let _gps = transport.accept(&ChannelKey::Gps);
        let live = LiveChannels::new(transport.clone(), settings());

        let first = live.open_gps();
        let manager = live.manager(&ChannelKey::Gps).unwrap();
        manager.wait_open().await.unwrap();

        assert!(live.close(&ChannelKey::Gps));
        assert!(manager.is_disposed());
        assert!(live.manager(&ChannelKey::Gps).is_none());
        assert!(!live.close(&ChannelKey::Gps));

        let _again = transport.accept(&ChannelKey::Gps);
        let second = live.open_gps();
        assert!(!first.same(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn conversations_are_independent_channels() {
        let transport = ScriptedTransport::new();
        let c1 = transport.accept(&ChannelKey::conversation("c1"));
        let _c2 = transport.accept(&ChannelKey::conversation("c2"));
        let live = LiveChannels::new(transport.clone(), settings());

        let one = live.open_conversation("c1");
        let two = live.open_conversation("c2");
        settle().await;

        c1.send(
            &PushMessage::new("ai_message", json!({"content": "hi", "sender": "agent"}), t(0))
                .with_id("t1"),
        );
        settle().await;

        assert_eq!(one.read(|c| c.turns().len()), 1);
        assert_eq!(two.read(|c| c.turns().len()), 0);

        let health = live.health();
        assert_eq!(health.total_channels, 2);
        assert!(health.overall_healthy);

        live.close_all();
        assert_eq!(live.health().total_channels, 0);
        assert!(live.open_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_while_reconnecting() {
        let transport = ScriptedTransport::new();
        let gps = transport.accept(&ChannelKey::Gps);
        let _notes = transport.accept(&ChannelKey::Notifications);
        let live = LiveChannels::new(transport.clone(), settings());
        live.open_gps();
        live.open_notifications();
        settle().await;
        assert!(live.health().overall_healthy);

        gps.fail("reset");
        settle().await;
        let health = live.health();
        assert_eq!(health.channels["gps"], ConnectionStatus::Closed);
        assert!(!health.overall_healthy);
    }
}
