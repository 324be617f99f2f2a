//! Rate limiting strategies and their per-key state management.

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use serde::{Deserialize, Serialize};

/// Which rate limiting strategy governs a route.
///
/// `None` means no limiting is applied; it is both the default for
/// unconfigured routes and a valid explicit configuration. The enum is
/// closed and matched exhaustively by the dispatcher, so adding a strategy
/// is a compile-time-checked change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// No rate limiting
    #[default]
    None,
    /// Token bucket with continuous refill
    TokenBucket,
    /// Fixed window counters
    FixedWindow,
    /// Weighted two-window sliding estimate
    SlidingWindow,
}

/// Start of the window containing `now`, aligned to `window_size` seconds.
pub(crate) fn window_start(now: i64, window_size: i64) -> i64 {
    now.div_euclid(window_size) * window_size
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub(crate) fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
