//! Fixed window strategy with discrete epoch-aligned counters.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{Result, TollgateError};

use super::{now_secs, window_start};

/// Per-key window counters shared by the fixed and sliding strategies.
///
/// Holds at most the current and immediately preceding window once pruned,
/// so per-key memory stays bounded regardless of process lifetime.
#[derive(Debug, Default)]
pub(crate) struct WindowCounts {
    /// Window start timestamp -> request count in that window
    pub(crate) slots: HashMap<i64, u64>,
    /// Last time this key was checked, epoch seconds
    pub(crate) last_seen: i64,
}

impl WindowCounts {
    /// Drop every window older than the one preceding `current_window`.
    pub(crate) fn prune(&mut self, current_window: i64, window_size: i64) {
        self.slots.retain(|&w, _| w >= current_window - window_size);
    }

    /// Recorded count for a window, zero if absent.
    pub(crate) fn count(&self, window: i64) -> u64 {
        self.slots.get(&window).copied().unwrap_or(0)
    }
}

/// Fixed window rate limiter.
///
/// Time is partitioned into consecutive, non-overlapping windows of
/// `window_size` seconds; each key may make at most `max_requests`
/// requests within any single window. A burst at the very end of one
/// window followed by a burst at the start of the next is fully admitted;
/// that boundary weakness is inherent to the algorithm and smoothing it
/// out is the sliding window strategy's job.
pub struct FixedWindow {
    window_size: i64,
    max_requests: u64,
    counters: DashMap<String, WindowCounts>,
}

impl FixedWindow {
    /// Create a new fixed window strategy.
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
        self.admit_at(key, now_secs() as i64)
    }

    /// Check whether a request from the given key is allowed at an
    /// explicit time, given as whole epoch seconds.
    ///
    /// Stale windows are pruned before the check; the current window's
    /// counter is incremented only when the request is admitted.
    pub fn admit_at(&self, key: &str, now: i64) -> bool {
        let window = window_start(now, self.window_size);
        let mut counts = self.counters.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, window = window, "Creating fixed window counters");
            WindowCounts::default()
        });

        counts.prune(window, self.window_size);
        counts.last_seen = now;

        let count = counts.slots.entry(window).or_insert(0);
        if *count >= self.max_requests {
            debug!(key = %key, window = window, count = *count, "Fixed window exhausted");
            false
        } else {
            *count += 1;
            trace!(key = %key, window = window, count = *count, "Fixed window admit");
            true
        }
    }

    /// Recorded count for a key in the window starting at `window`.
    ///
    /// Returns `None` if the key or the window is not tracked; pruned
    /// windows stop being queryable.
    pub fn window_count(&self, key: &str, window: i64) -> Option<u64> {
        self.counters
            .get(key)
            .and_then(|counts| counts.slots.get(&window).copied())
    }

    /// Seconds until the window containing `now` rolls over.
    ///
    /// The boundary depends only on time, not on any key's state.
    pub fn seconds_to_next_window(&self, now: i64) -> i64 {
        window_start(now, self.window_size) + self.window_size - now
    }

    /// The configured window size in seconds.
    pub fn window_size(&self) -> i64 {
        self.window_size
    }

    /// The configured per-window request limit.
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
            debug!(evicted = evicted, "Evicted idle fixed window counters");
        }
        evicted
    }
}
