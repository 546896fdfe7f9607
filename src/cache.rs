//! Small TTL cache for upstream discovery results.
//!
//! One cache per adapter instance, holding a single value (the model list)
//! with an expiry. Concurrent writers race benignly: last writer wins, which
//! is acceptable because discovery calls are idempotent and cheap to
//! duplicate occasionally.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TtlCache<T> {
    slot: Mutex<Option<(T, Instant)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// Returns the cached value if present and not expired.
    pub fn get(&self) -> Option<T> {
        let slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match slot.as_ref() {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some((value, Instant::now()));
    }

    /// Drops the cached value so the next `get` misses.
    pub fn invalidate(&self) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = None;
    }
}
