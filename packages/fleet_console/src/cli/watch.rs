//! `fleet watch`: keep every dashboard channel open and log a summary line.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_state::{
    ConversationTracker, Liveness, NotificationTracker, PositionTracker, Severity, StatusTracker,
    Tracker,
};
use push_channel::{ChannelKey, StatusSnapshot};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::FleetConfig;

/// One line of dashboard state.
#[derive(Debug, Default, PartialEq)]
pub struct Summary {
    pub open_channels: usize,
    pub total_channels: usize,
    pub healthy: bool,
    pub vehicles: usize,
    pub liveness: BTreeMap<Liveness, usize>,
    pub samples_per_second: usize,
    pub shipments: usize,
    pub unread: usize,
    pub highest_severity: Option<Severity>,
    pub conversation_turns: usize,
    pub producing: usize,
}

impl Summary {
    pub fn collect(
        health: &StatusSnapshot,
        gps: &Tracker<PositionTracker>,
        shipments: &Tracker<StatusTracker>,
        notifications: &Tracker<NotificationTracker>,
        conversations: &[Tracker<ConversationTracker>],
    ) -> Self {
        let (vehicles, liveness, samples_per_second) =
            gps.read(|p| (p.len(), p.liveness_counts(), p.samples_per_second()));
        let (unread, highest_severity) = notifications.read(|n| (n.unread(), n.highest_severity()));

        let mut summary = Self {
            open_channels: health.open_channels,
            total_channels: health.total_channels,
            healthy: health.overall_healthy,
            vehicles,
            liveness,
            samples_per_second,
            shipments: shipments.read(|s| s.len()),
            unread,
            highest_severity,
            ..Self::default()
        };
        for conversation in conversations {
            conversation.read(|c| {
                summary.conversation_turns += c.turns().len();
                if c.is_producing() {
                    summary.producing += 1;
                }
            });
        }
        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = |l: Liveness| self.liveness.get(&l).copied().unwrap_or(0);
        write!(
            f,
            "channels {}/{}{} | vehicles {} (fresh {}, warning {}, stale {}) {}/s | shipments {} | unread {}",
            self.open_channels,
            self.total_channels,
            if self.healthy { "" } else { " degraded" },
            self.vehicles,
            count(Liveness::Fresh),
            count(Liveness::Warning),
            count(Liveness::Stale),
            self.samples_per_second,
            self.shipments,
            self.unread,
        )?;
        if let Some(severity) = self.highest_severity {
            write!(f, " (max {})", severity)?;
        }
        if self.conversation_turns > 0 || self.producing > 0 {
            write!(f, " | turns {}", self.conversation_turns)?;
            if self.producing > 0 {
                write!(f, ", {} producing", self.producing)?;
            }
        }
        Ok(())
    }
}

pub async fn watch_command(
    config: &FleetConfig,
    conversation_ids: &[String],
    interval: Duration,
) -> Result<()> {
    let live = super::live_channels(config);

    let gps = live.open_gps();
    let shipments = live.open_shipments();
    let notifications = live.open_notifications();
    let conversations: Vec<_> = conversation_ids
        .iter()
        .map(|id| live.open_conversation(id))
        .collect();

    info!(
        server = %config.file.server.base_url,
        channels = live.open_keys().len(),
        "watching live channels"
    );

    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so channels get a chance to open.
    ticker.tick().await;

    let mut reported: HashSet<ChannelKey> = HashSet::new();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("received shutdown signal, closing channels");
                break;
            }
            _ = ticker.tick() => {
                let health = live.health();
                let summary = Summary::collect(
                    &health,
                    &gps,
                    &shipments,
                    &notifications,
                    &conversations,
                );
                info!("{}", summary);

                for key in live.open_keys() {
                    let exhausted = live.manager(&key).is_some_and(|m| m.state().exhausted);
                    if exhausted && reported.insert(key.clone()) {
                        warn!(channel = %key, "channel stopped reconnecting; restart to retry");
                    } else if !exhausted {
                        reported.remove(&key);
                    }
                }
            }
        }
    }

    live.close_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_for_a_healthy_dashboard() {
        let summary = Summary {
            open_channels: 3,
            total_channels: 3,
            healthy: true,
            vehicles: 2,
            liveness: BTreeMap::from([(Liveness::Fresh, 1), (Liveness::Stale, 1)]),
            samples_per_second: 4,
            shipments: 7,
            unread: 0,
            ..Summary::default()
        };
        assert_eq!(
            summary.to_string(),
            "channels 3/3 | vehicles 2 (fresh 1, warning 0, stale 1) 4/s | shipments 7 | unread 0"
        );
    }

    #[test]
    fn summary_line_flags_degraded_and_conversations() {
        let summary = Summary {
            open_channels: 2,
            total_channels: 4,
            unread: 3,
            highest_severity: Some(Severity::Urgent),
            conversation_turns: 5,
            producing: 1,
            ..Summary::default()
        };
        let line = summary.to_string();
        assert!(line.starts_with("channels 2/4 degraded"), "{line}");
        assert!(line.contains("unread 3 (max urgent)"), "{line}");
        assert!(line.ends_with("turns 5, 1 producing"), "{line}");
    }

    #[test]
    fn summary_from_empty_trackers() {
        let health = StatusSnapshot {
            channels: BTreeMap::new(),
            total_channels: 0,
            open_channels: 0,
            overall_healthy: true,
        };
        let summary = Summary::collect(
            &health,
            &Tracker::new(PositionTracker::default()),
            &Tracker::new(StatusTracker::new()),
            &Tracker::new(NotificationTracker::default()),
            &[Tracker::new(ConversationTracker::new("c1"))],
        );
        assert_eq!(summary.vehicles, 0);
        assert_eq!(summary.conversation_turns, 0);
        assert!(summary.healthy);
    }
}
