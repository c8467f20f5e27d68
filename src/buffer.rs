//! Hand-off buffer between a sampler thread and the control loop.

use crate::config::MAX_BUFFER_CAPACITY;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::debug;

/// Mean of one noise-filtered sampling window.
///
/// Temperature and humidity always travel together so a consumer can never
/// observe one without the other.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredEstimate {
    pub sensor_id: u8,
    pub temperature: f64,
    pub humidity: f64,
    /// Valid samples that survived noise elimination (humidity series).
    pub samples_used: u8,
    pub produced_at: SystemTime,
}

type EstimateQueue = Deque<FilteredEstimate, MAX_BUFFER_CAPACITY>;

/// Bounded, mutex-guarded queue of estimates. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct EstimateBuffer {
    inner: Arc<Mutex<EstimateQueue>>,
    capacity: usize,
}

impl EstimateBuffer {
    /// `capacity` is clamped to `1..=MAX_BUFFER_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Deque::new())),
            capacity: capacity.clamp(1, MAX_BUFFER_CAPACITY),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EstimateQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a fully computed estimate, evicting the oldest when full.
    pub fn push(&self, estimate: FilteredEstimate) {
        let mut queue = self.lock();
        while queue.len() >= self.capacity {
            if let Some(evicted) = queue.pop_front() {
                debug!(sensor = evicted.sensor_id, "estimate buffer full, dropping oldest");
            }
        }
        let pushed = queue.push_back(estimate);
        // len < capacity <= MAX_BUFFER_CAPACITY after eviction.
        debug_assert!(pushed.is_ok(), "estimate buffer overflowed at {}", queue.len());
    }

    /// Take the newest estimate and discard anything older.
    pub fn pop_latest(&self) -> Option<FilteredEstimate> {
        let mut queue = self.lock();
        let latest = queue.pop_back();
        let stale = queue.len();
        queue.clear();
        if stale > 0 {
            debug!(stale, "discarded stale estimates");
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
