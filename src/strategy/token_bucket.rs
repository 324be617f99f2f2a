//! Token bucket strategy with continuous refill.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::{Result, TollgateError};

use super::now_secs;

/// Per-key bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Tokens currently available, always within `[0, capacity]`
    tokens: f64,
    /// Timestamp of the last refill, fractional seconds since the epoch
    last_refill: f64,
}

/// Token bucket rate limiter.
///
/// Each client key owns a reservoir of `capacity` tokens that refills
/// continuously at `refill_rate` tokens per second. A key seen for the
/// first time starts with a full bucket, so first-time callers are never
/// penalized. Per-key state lives in a sharded map; read-modify-write of
/// one key's bucket happens under its shard lock, so checks for the same
/// key are serialized while distinct keys proceed in parallel.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    buckets: DashMap<String, Bucket>,
}

impl TokenBucket {
    /// Create a new token bucket strategy.
    ///
    /// `capacity` must be positive and finite. `refill_rate` must be
    /// non-negative and finite; a rate of zero is legal and means the
    /// bucket never refills (a fixed initial allowance per key).
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(TollgateError::Config(format!(
                "token bucket capacity must be positive, got {}",
                capacity
            )));
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(TollgateError::Config(format!(
                "token bucket refill rate must be non-negative, got {}",
                refill_rate
            )));
        }
        Ok(Self {
            capacity,
            refill_rate,
            buckets: DashMap::new(),
        })
    }

    /// Try to consume one token for the given key.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_n(key, 1.0)
    }

    /// Try to consume `cost` tokens for the given key.
    ///
    /// `cost` may be fractional, and may exceed `capacity`, in which case
    /// the key can never be admitted and every call returns `false`.
    pub fn admit_n(&self, key: &str, cost: f64) -> bool {
        self.admit_at(key, cost, now_secs())
    }

    /// Try to consume `cost` tokens for the given key at an explicit time.
    ///
    /// Refill is applied first, clamped at `capacity`, and the stored
    /// timestamp is advanced to `now` whether or not the request is
    /// admitted: refill accrues in real time independent of the verdict.
    pub fn admit_at(&self, key: &str, cost: f64, now: f64) -> bool {
        let mut bucket = self.buckets.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, capacity = self.capacity, "Creating new token bucket");
            Bucket {
                tokens: self.capacity,
                last_refill: now,
            }
        });

        let elapsed = (now - bucket.last_refill).max(0.0);
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            trace!(key = %key, cost = cost, remaining = bucket.tokens, "Token bucket admit");
            true
        } else {
            debug!(key = %key, cost = cost, available = bucket.tokens, "Token bucket exhausted");
            false
        }
    }

    /// Tokens currently available for a key, with refill applied but no
    /// state mutated. Returns `None` for a key never seen.
    pub fn tokens_at(&self, key: &str, now: f64) -> Option<f64> {
        self.buckets.get(key).map(|bucket| {
            let elapsed = (now - bucket.last_refill).max(0.0);
            (bucket.tokens + elapsed * self.refill_rate).min(self.capacity)
        })
    }

    /// Tokens currently available for a key at the current wall-clock time.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.tokens_at(key, now_secs())
    }

    /// Seconds until `cost` tokens become available for a key.
    ///
    /// Returns `Some(0.0)` if the request would be admitted right now, and
    /// `None` if it can never be admitted (cost above capacity, or a
    /// deficit with a zero refill rate).
    pub fn retry_after_at(&self, key: &str, cost: f64, now: f64) -> Option<f64> {
        if cost > self.capacity {
            return None;
        }
        let available = self.tokens_at(key, now).unwrap_or(self.capacity);
        let deficit = cost - available;
        if deficit <= 0.0 {
            Some(0.0)
        } else if self.refill_rate == 0.0 {
            None
        } else {
            Some(deficit / self.refill_rate)
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// The configured refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Number of keys with tracked state.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    /// Remove state for keys not touched within `max_idle`.
    ///
    /// Returns the number of keys evicted. Eviction never changes a
    /// verdict: an evicted key starts over with a full bucket, which is
    /// the same allowance a refill of that idle span would have restored
    /// (or better, for zero-refill buckets, which is accepted as part of
    /// this maintenance operation).
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(max_idle.as_secs_f64(), now_secs())
    }

    fn evict_idle_at(&self, max_idle: f64, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now - bucket.last_refill <= max_idle);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle token buckets");
        }
        evicted
    }
}
