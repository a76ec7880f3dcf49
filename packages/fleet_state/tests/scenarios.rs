use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use fleet_state::{Clock, LiveChannels, Liveness, TrackingSettings};
use push_channel::testing::ScriptedTransport;
use push_channel::{BackoffPolicy, ChannelKey, ConnectionStatus, PushMessage};
use serde_json::json;
use tokio::time::Instant;

fn base() -> DateTime<Utc> {
    "2025-01-27T10:00:00Z".parse().unwrap()
}

/// Wall clock that advances with tokio's paused clock.
fn paused_clock() -> Clock {
    let start = Instant::now();
    Arc::new(move || base() + TimeDelta::from_std(start.elapsed()).unwrap())
}

fn settings() -> TrackingSettings {
    TrackingSettings {
        backoff: BackoffPolicy::new(Duration::from_secs(1), 5, None),
        ..Default::default()
    }
}

fn gps(vehicle: &str, n: u32, at: DateTime<Utc>) -> PushMessage {
    PushMessage::new(
        "gps_location_update",
        json!({
            "vehicle_id": vehicle,
            "latitude": 31.0 + f64::from(n) * 0.001,
            "longitude": 121.0,
            "speed": 40.0,
        }),
        at,
    )
    .with_id(format!("sample-{n}"))
}

#[tokio::test(start_paused = true)]
async fn gps_buffer_keeps_last_two_samples() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept(&ChannelKey::Gps);
    let live = LiveChannels::with_clock(transport.clone(), settings(), paused_clock());

    let positions = live.open_gps();
    live.manager(&ChannelKey::Gps).unwrap().wait_open().await.unwrap();
    positions.update(|p| p.set_max_buffer_size(2));

    for n in 1..=3 {
        feed.send(&gps("V1", n, base() + TimeDelta::seconds(i64::from(n))));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let stamps: Vec<DateTime<Utc>> = positions.read(|p| {
        p.entity("V1")
            .unwrap()
            .samples()
            .map(|s| s.timestamp)
            .collect()
    });
    assert_eq!(
        stamps,
        vec![base() + TimeDelta::seconds(2), base() + TimeDelta::seconds(3)]
    );
    assert_eq!(positions.read(|p| p.entity("V1").unwrap().liveness()), Liveness::Fresh);
}

#[tokio::test(start_paused = true)]
async fn silent_vehicle_goes_stale_on_the_ticker() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept(&ChannelKey::Gps);
    let live = LiveChannels::with_clock(transport.clone(), settings(), paused_clock());

    let positions = live.open_gps();
    live.manager(&ChannelKey::Gps).unwrap().wait_open().await.unwrap();
    feed.send(&gps("V1", 1, base()));

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(
        positions.read(|p| p.entity("V1").unwrap().liveness()),
        Liveness::Warning
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        positions.read(|p| p.entity("V1").unwrap().liveness()),
        Liveness::Stale
    );

    // closing the channel stops reclassification with it
    live.close(&ChannelKey::Gps);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        positions.read(|p| p.entity("V1").unwrap().liveness()),
        Liveness::Stale
    );
}

#[tokio::test(start_paused = true)]
async fn transport_error_recovers_within_backoff_window() {
    let transport = ScriptedTransport::new();
    let first = transport.accept(&ChannelKey::Gps);
    let _second = transport.accept(&ChannelKey::Gps);
    let live = LiveChannels::new(transport.clone(), settings());

    live.open_gps();
    let manager = live.manager(&ChannelKey::Gps).unwrap();
    manager.wait_open().await.unwrap();

    // long enough to observe the connecting state
    transport.set_latency(Duration::from_millis(100));
    let mut states = manager.subscribe();
    states.borrow_and_update();
    let failed_at = Instant::now();
    first.fail("connection reset");

    let mut seen = Vec::new();
    while seen.last() != Some(&ConnectionStatus::Open) {
        states.changed().await.unwrap();
        let status = states.borrow_and_update().status;
        if seen.last() != Some(&status) {
            seen.push(status);
        }
    }

    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Closed,
            ConnectionStatus::Connecting,
            ConnectionStatus::Open
        ]
    );
    assert!(failed_at.elapsed() >= Duration::from_secs(1));
    assert!(failed_at.elapsed() < Duration::from_secs(2));
    assert_eq!(manager.state().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn producing_flag_spans_the_gap_before_content() {
    let key: ChannelKey = "ai:conv-1".parse().unwrap();
    let transport = ScriptedTransport::new();
    let feed = transport.accept(&key);
    let live = LiveChannels::new(transport.clone(), settings());

    let conversation = live.open_conversation("conv-1");
    live.manager(&key).unwrap().wait_open().await.unwrap();

    feed.send(&PushMessage::new("ai_message", json!({"event": "producing"}), base()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(conversation.read(|c| c.is_producing()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(conversation.read(|c| c.is_producing()));

    feed.send(&PushMessage::new(
        "ai_message",
        json!({"turn_id": "t1", "content": "Truck V1 is 20 minutes out", "sender": "agent"}),
        base() + TimeDelta::seconds(2),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!conversation.read(|c| c.is_producing()));
    let ids: Vec<String> =
        conversation.read(|c| c.turns().iter().map(|t| t.turn_id.clone()).collect());
    assert_eq!(ids, vec!["t1"]);
}

#[tokio::test(start_paused = true)]
async fn notifications_count_unread_across_the_channel() {
    let transport = ScriptedTransport::new();
    let feed = transport.accept(&ChannelKey::Notifications);
    let live = LiveChannels::new(transport.clone(), settings());

    let notes = live.open_notifications();
    live.manager(&ChannelKey::Notifications)
        .unwrap()
        .wait_open()
        .await
        .unwrap();

    for i in 0..4 {
        feed.send(&PushMessage::new(
            "notification",
            json!({"title": format!("Delay {i}"), "message": "late", "priority": "high"}),
            base(),
        ));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(notes.read(|n| n.unread()), 4);

    notes.update(|n| n.mark_all_read());
    feed.send(&PushMessage::new("notification", json!({"title": "Arrived"}), base()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(notes.read(|n| n.unread()), 1);
    assert_eq!(
        notes.read(|n| n.records().next().map(|r| r.title.clone())),
        Some("Arrived".to_string())
    );
}
