use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Wall-clock source handed to processors. Swappable so tests can drive
/// liveness from tokio's paused clock.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Shared handle to one processor's state.
///
/// Every access is a short synchronous critical section; callers get a
/// consistent view of the state between two message arrivals.
pub struct Tracker<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for Tracker<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Tracker<P> {
    pub fn new(processor: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(processor)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Whether two handles share the same state.
    pub fn same(&self, other: &Tracker<P>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
