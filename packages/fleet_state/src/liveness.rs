//! Periodic liveness reclassification.
//!
//! A vehicle that stops transmitting never triggers another arrival, so the
//! position tracker is re-evaluated on a fixed interval from the wall clock
//! alone. The ticker belongs to one gps channel and stops with it.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::position::PositionTracker;
use crate::tracker::{Clock, Tracker};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct LivenessTicker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LivenessTicker {
    /// Start reclassifying `tracker` every `period` until `cancel` fires or
    /// the ticker is dropped.
    pub fn spawn(
        tracker: Tracker<PositionTracker>,
        period: Duration,
        cancel: CancellationToken,
        clock: Clock,
    ) -> Self {
        let period = period.max(MIN_INTERVAL);
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        let now = clock();
                        let changes = tracker.update(|p| p.reclassify(now));
                        for change in changes {
                            info!(
                                entity = %change.entity_id,
                                from = %change.from,
                                to = %change.to,
                                "liveness changed"
                            );
                        }
                    }
                }
            }
            debug!("liveness ticker stopped");
        });

        Self { cancel, task }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LivenessTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
