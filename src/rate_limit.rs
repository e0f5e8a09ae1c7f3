//! Per-endpoint sliding window rate limiter.
//!
//! Each endpoint string owns a queue of send timestamps inside the trailing
//! window. Stale entries are pruned when that endpoint is checked. Idle
//! endpoints are swept inline once the tracked count passes a high-water
//! mark that doubles after every sweep; there is no background task.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Tracked endpoint count above which idle windows are first swept.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1_024;

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    sweep_threshold: usize,
    state: Mutex<Windows>,
}

#[derive(Debug)]
struct Windows {
    by_endpoint: HashMap<String, VecDeque<Instant>>,
    // Sweep once `by_endpoint` grows past this.
    next_sweep_at: usize,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            state: Mutex::new(Windows {
                by_endpoint: HashMap::new(),
                next_sweep_at: DEFAULT_SWEEP_THRESHOLD,
            }),
        }
    }

    /// Overrides the tracked endpoint count that triggers the first sweep.
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .next_sweep_at = threshold;
        self
    }

    /// Records a request for `endpoint` if the window has room.
    pub fn is_allowed(&self, endpoint: &str) -> bool {
        self.is_allowed_at(endpoint, Instant::now())
    }

    /// Same as [`is_allowed`](Self::is_allowed) against an explicit clock reading.
    pub fn is_allowed_at(&self, endpoint: &str, now: Instant) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let allowed = {
            let timestamps = state.by_endpoint.entry(endpoint.to_owned()).or_default();

            // Entries at or before the window start fall out.
            if let Some(window_start) = now.checked_sub(self.window) {
                while timestamps.front().is_some_and(|t| *t <= window_start) {
                    timestamps.pop_front();
                }
            }

            if timestamps.len() >= self.max_requests {
                false
            } else {
                timestamps.push_back(now);
                true
            }
        };

        if state.by_endpoint.len() > state.next_sweep_at {
            self.sweep(state, now);
        }
        allowed
    }

    /// Number of endpoints currently tracked.
    pub fn tracked_endpoints(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_endpoint
            .len()
    }

    /// Drops endpoints whose every timestamp has aged out of the window.
    pub fn prune_idle(&self) {
        self.prune_idle_at(Instant::now());
    }

    pub fn prune_idle_at(&self, now: Instant) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut guard, now);
    }

    fn sweep(&self, state: &mut Windows, now: Instant) {
        if let Some(window_start) = now.checked_sub(self.window) {
            state.by_endpoint.retain(|_, timestamps| {
                timestamps.retain(|t| *t > window_start);
                !timestamps.is_empty()
            });
        }
        state.next_sweep_at = self
            .sweep_threshold
            .max(state.by_endpoint.len().saturating_mul(2));
    }
}
