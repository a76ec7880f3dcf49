use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::channel::ChannelKey;
use crate::connection::{ConnectionManager, ConnectionStatus};

/// Health of every managed channel at one instant
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Status per channel, keyed by the channel's string form
    pub channels: BTreeMap<String, ConnectionStatus>,
    pub total_channels: usize,
    pub open_channels: usize,
    /// At least one channel, and every channel open
    pub overall_healthy: bool,
}

/// Multiplexes connection managers by channel key.
///
/// Construct one per application (or per test); there is no global instance.
#[derive(Default)]
pub struct ChannelRegistry {
    managers: Mutex<HashMap<ChannelKey, Arc<ConnectionManager>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, Arc<ConnectionManager>>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live manager for `key`, creating it with `factory` if there is
    /// none or the stored one was disposed.
    pub fn get_or_create<F>(&self, key: ChannelKey, factory: F) -> Arc<ConnectionManager>
    where
        F: FnOnce(&ChannelKey) -> Arc<ConnectionManager>,
    {
        let mut managers = self.lock();
        if let Some(existing) = managers.get(&key) {
            if !existing.is_disposed() {
                return existing.clone();
            }
            debug!(channel = %key, "replacing disposed channel");
        }

        let manager = factory(&key);
        info!(channel = %key, "channel registered");
        managers.insert(key, manager.clone());
        manager
    }

    pub fn get(&self, key: &ChannelKey) -> Option<Arc<ConnectionManager>> {
        self.lock()
            .get(key)
            .filter(|m| !m.is_disposed())
            .cloned()
    }

    /// Dispose and forget one channel. Returns whether it was registered.
    pub fn dispose(&self, key: &ChannelKey) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(manager) => {
                manager.dispose();
                true
            }
            None => false,
        }
    }

    /// Tear down every managed channel.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, m)| m).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "disposing all channels");
        }
        for manager in drained {
            manager.dispose();
        }
    }

    /// Live channels only. A manager disposed directly stays in the map until
    /// its key is reused, but no longer counts as registered.
    fn live(&self) -> Vec<(ChannelKey, Arc<ConnectionManager>)> {
        self.lock()
            .iter()
            .filter(|(_, m)| !m.is_disposed())
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.live().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let channels: BTreeMap<String, ConnectionStatus> = self
            .live()
            .into_iter()
            .map(|(key, manager)| (key.to_string(), manager.status()))
            .collect();

        let total_channels = channels.len();
        let open_channels = channels
            .values()
            .filter(|s| **s == ConnectionStatus::Open)
            .count();

        StatusSnapshot {
            channels,
            total_channels,
            open_channels,
            overall_healthy: total_channels > 0 && open_channels == total_channels,
        }
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
