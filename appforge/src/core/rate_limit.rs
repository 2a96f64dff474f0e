//! Fixed-window admission gate keyed by client identifier.
//!
//! Each identifier owns a window that opens on its first request. Requests are
//! counted until `now` passes the window's reset time, at which point the next
//! request opens a fresh window with a count of one. Bursts straddling a window
//! boundary can be admitted twice over; that approximation is accepted.
//!
//! State lives for the process lifetime and is never persisted or evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic time for the gate.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

/// Concurrency-safe fixed-window counter.
pub struct RateGate {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `identifier` and report whether it is admitted.
    ///
    /// The check and the increment happen under one lock, so concurrent calls
    /// for the same identifier never lose a count.
    pub fn admit(&self, identifier: &str, max_requests: u32, window: Duration) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        match windows.get_mut(identifier) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= max_requests {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                windows.insert(
                    identifier.to_string(),
                    RateWindow {
                        count: 1,
                        reset_at: now + window,
                    },
                );
                true
            }
        }
    }

    /// Requests still available to `identifier` in its current window.
    pub fn remaining(&self, identifier: &str, max_requests: u32) -> u32 {
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        match windows.get(identifier) {
            Some(entry) if now <= entry.reset_at => max_requests.saturating_sub(entry.count),
            _ => max_requests,
        }
    }
}
