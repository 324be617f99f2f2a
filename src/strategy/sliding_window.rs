//! Sliding window strategy blending two adjacent fixed windows.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{Result, TollgateError};

use super::fixed_window::WindowCounts;
use super::{now_secs, window_start};

/// Sliding window rate limiter.
///
/// Approximates a continuously sliding window of `window_size` seconds by
/// weighting the previous fixed window's count by the fraction of it still
/// inside the trailing interval: with previous count `P`, current count
/// `C`, and `frac` the elapsed fraction of the current window, the
/// estimate is `P * (1 - frac) + C`. A burst straddling a window boundary
/// is therefore partially charged against the previous window, closing the
/// fixed window strategy's boundary-burst hole.
pub struct SlidingWindow {
    window_size: i64,
    max_requests: u64,
    counters: DashMap<String, WindowCounts>,
}

impl SlidingWindow {
    /// Create a new sliding window strategy.
    ///
    /// `window_size` is in seconds; both parameters must be positive.
    pub fn new(window_size: i64, max_requests: u64) -> Result<Self> {
        if window_size <= 0 {
            return Err(TollgateError::Config(format!(
                "window size must be positive, got {}",
                window_size
            )));
        }
        if max_requests == 0 {
            return Err(TollgateError::Config(
                "max requests must be positive".to_string(),
            ));
        }
        Ok(Self {
            window_size,
            max_requests,
            counters: DashMap::new(),
        })
    }

    /// Check whether a request from the given key is allowed right now.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, now_secs())
    }

    /// Check whether a request from the given key is allowed at an
    /// explicit time, given as fractional epoch seconds.
    ///
    /// A key with no recorded previous window is charged nothing for it.
    pub fn admit_at(&self, key: &str, now: f64) -> bool {
        let current = window_start(now.floor() as i64, self.window_size);
        let previous = current - self.window_size;
        let frac = (now - current as f64) / self.window_size as f64;

        let mut counts = self.counters.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, window = current, "Creating sliding window counters");
            WindowCounts::default()
        });

        counts.prune(current, self.window_size);
        counts.last_seen = now.floor() as i64;

        let previous_count = counts.count(previous) as f64;
        let current_count = counts.count(current) as f64;
        let estimate = previous_count * (1.0 - frac) + current_count;

        if estimate < self.max_requests as f64 {
            *counts.slots.entry(current).or_insert(0) += 1;
            trace!(key = %key, estimate = estimate, "Sliding window admit");
            true
        } else {
            debug!(key = %key, estimate = estimate, "Sliding window exhausted");
            false
        }
    }

    /// Weighted request estimate for a key over the trailing window,
    /// without mutating any state. Returns `None` for a key never seen.
    pub fn estimate_at(&self, key: &str, now: f64) -> Option<f64> {
        let current = window_start(now.floor() as i64, self.window_size);
        let previous = current - self.window_size;
        let frac = (now - current as f64) / self.window_size as f64;

        self.counters.get(key).map(|counts| {
            counts.count(previous) as f64 * (1.0 - frac) + counts.count(current) as f64
        })
    }

    /// Seconds until the window containing `now` rolls over.
    pub fn seconds_to_next_window(&self, now: f64) -> f64 {
        let current = window_start(now.floor() as i64, self.window_size);
        (current + self.window_size) as f64 - now
    }

    /// The configured window size in seconds.
    pub fn window_size(&self) -> i64 {
        self.window_size
    }

    /// The configured trailing-window request limit.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Number of keys with tracked state.
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    /// Remove state for keys not touched within `max_idle`.
    ///
    /// Returns the number of keys evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(max_idle.as_secs() as i64, now_secs() as i64)
    }

    fn evict_idle_at(&self, max_idle: i64, now: i64) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, counts| now - counts.last_seen <= max_idle);
        let evicted = before - self.counters.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle sliding window counters");
        }
        evicted
    }
}
