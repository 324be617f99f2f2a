//! Unified dispatch: resolve a path's policy and consult the strategy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::policy::RoutePolicy;
use crate::strategy::{now_secs, FixedWindow, SlidingWindow, StrategyKind, TokenBucket};

/// Machine-readable explanation of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No strategy governs this path
    Unlimited,
    /// The governing strategy had budget left
    WithinBudget,
    /// Token bucket exhausted; retry after the refill catches up
    TokensExhausted,
    /// Fixed or sliding window exhausted; retry after the window boundary
    WindowExhausted,
}

/// The outcome of one admission decision.
///
/// Serializable so the embedding pipeline can render a rejection straight
/// into a "too many requests" body; the engine itself never produces HTTP
/// status codes.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The strategy that produced this verdict
    pub kind: StrategyKind,
    /// Why the request was admitted or rejected
    pub reason: Reason,
    /// Approximate wait until one unit of budget is available again.
    /// Absent on admission and for budgets that never replenish.
    pub retry_after: Option<Duration>,
}

impl Verdict {
    fn admitted(kind: StrategyKind, reason: Reason) -> Self {
        Self {
            admitted: true,
            kind,
            reason,
            retry_after: None,
        }
    }

    fn rejected(kind: StrategyKind, reason: Reason, retry_after: Option<Duration>) -> Self {
        Self {
            admitted: false,
            kind,
            reason,
            retry_after,
        }
    }
}

/// The single entry point the request pipeline calls per request.
///
/// Owns shared handles to the route policy and the three strategy
/// instances; the composition root constructs them explicitly (no global
/// singletons), so independent configurations can coexist, one per
/// dispatcher.
pub struct Dispatcher {
    policy: Arc<RoutePolicy>,
    token_bucket: Arc<TokenBucket>,
    fixed_window: Arc<FixedWindow>,
    sliding_window: Arc<SlidingWindow>,
}

impl Dispatcher {
    /// Assemble a dispatcher from its collaborators.
    pub fn new(
        policy: Arc<RoutePolicy>,
        token_bucket: Arc<TokenBucket>,
        fixed_window: Arc<FixedWindow>,
        sliding_window: Arc<SlidingWindow>,
    ) -> Self {
        Self {
            policy,
            token_bucket,
            fixed_window,
            sliding_window,
        }
    }

    /// The route policy, for runtime reconfiguration.
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Decide whether a request may proceed.
    pub fn decide(&self, path: &str, client_key: &str) -> Verdict {
        self.decide_at(path, client_key, now_secs())
    }

    /// Decide whether a request may proceed, at an explicit time given as
    /// fractional epoch seconds.
    pub fn decide_at(&self, path: &str, client_key: &str, now: f64) -> Verdict {
        let kind = self.policy.resolve(path);
        trace!(path = %path, client = %client_key, kind = ?kind, "Dispatching admission check");

        let verdict = match kind {
            StrategyKind::None => Verdict::admitted(kind, Reason::Unlimited),
            StrategyKind::TokenBucket => {
                if self.token_bucket.admit_at(client_key, 1.0, now) {
                    Verdict::admitted(kind, Reason::WithinBudget)
                } else {
                    let retry = self
                        .token_bucket
                        .retry_after_at(client_key, 1.0, now)
                        .map(Duration::from_secs_f64);
                    Verdict::rejected(kind, Reason::TokensExhausted, retry)
                }
            }
            StrategyKind::FixedWindow => {
                let now_s = now.floor() as i64;
                if self.fixed_window.admit_at(client_key, now_s) {
                    Verdict::admitted(kind, Reason::WithinBudget)
                } else {
                    let retry = self.fixed_window.seconds_to_next_window(now_s);
                    Verdict::rejected(
                        kind,
                        Reason::WindowExhausted,
                        Some(Duration::from_secs(retry as u64)),
                    )
                }
            }
            StrategyKind::SlidingWindow => {
                if self.sliding_window.admit_at(client_key, now) {
                    Verdict::admitted(kind, Reason::WithinBudget)
                } else {
                    let retry = self.sliding_window.seconds_to_next_window(now);
                    Verdict::rejected(
                        kind,
                        Reason::WindowExhausted,
                        Some(Duration::from_secs_f64(retry.max(0.0))),
                    )
                }
            }
        };

        if !verdict.admitted {
            debug!(
                path = %path,
                client = %client_key,
                reason = ?verdict.reason,
                retry_after = ?verdict.retry_after,
                "Request rejected"
            );
        }
        verdict
    }

    /// Sweep all strategies, dropping state for keys idle longer than
    /// `max_idle`. Returns the total number of keys evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.token_bucket.evict_idle(max_idle)
            + self.fixed_window.evict_idle(max_idle)
            + self.sliding_window.evict_idle(max_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dispatcher() -> Dispatcher {
        let policy = Arc::new(RoutePolicy::new());
        policy.set_route("/bucket", StrategyKind::TokenBucket);
        policy.set_route("/fixed", StrategyKind::FixedWindow);
        policy.set_route("/sliding", StrategyKind::SlidingWindow);
        policy.exempt("/health");

        Dispatcher::new(
            policy,
            Arc::new(TokenBucket::new(3.0, 1.0).unwrap()),
            Arc::new(FixedWindow::new(60, 2).unwrap()),
            Arc::new(SlidingWindow::new(60, 2).unwrap()),
        )
    }

    #[test]
    fn test_unrouted_path_is_admitted_without_state() {
        let dispatcher = build_dispatcher();

        for _ in 0..100 {
            let verdict = dispatcher.decide_at("/open", "client", 0.0);
            assert!(verdict.admitted);
            assert_eq!(verdict.kind, StrategyKind::None);
            assert_eq!(verdict.reason, Reason::Unlimited);
            assert!(verdict.retry_after.is_none());
        }
    }

    #[test]
    fn test_exempt_path_is_never_limited() {
        let dispatcher = build_dispatcher();
        dispatcher.policy().set_route("/health", StrategyKind::TokenBucket);

        for _ in 0..100 {
            assert!(dispatcher.decide_at("/health", "client", 0.0).admitted);
        }
    }

    #[test]
    fn test_token_bucket_rejection_carries_refill_hint() {
        let dispatcher = build_dispatcher();

        for _ in 0..3 {
            assert!(dispatcher.decide_at("/bucket", "client", 0.0).admitted);
        }

        let verdict = dispatcher.decide_at("/bucket", "client", 0.0);
        assert!(!verdict.admitted);
        assert_eq!(verdict.reason, Reason::TokensExhausted);
        // One token at 1.0/s is one second away.
        assert_eq!(verdict.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_refill_rejection_has_no_hint() {
        let policy = Arc::new(RoutePolicy::new());
        policy.set_route("/bucket", StrategyKind::TokenBucket);
        let dispatcher = Dispatcher::new(
            policy,
            Arc::new(TokenBucket::new(1.0, 0.0).unwrap()),
            Arc::new(FixedWindow::new(60, 2).unwrap()),
            Arc::new(SlidingWindow::new(60, 2).unwrap()),
        );

        assert!(dispatcher.decide_at("/bucket", "client", 0.0).admitted);
        let verdict = dispatcher.decide_at("/bucket", "client", 0.0);
        assert!(!verdict.admitted);
        assert!(verdict.retry_after.is_none());
    }

    #[test]
    fn test_window_rejection_points_at_the_boundary() {
        let dispatcher = build_dispatcher();

        assert!(dispatcher.decide_at("/fixed", "client", 3600.0).admitted);
        assert!(dispatcher.decide_at("/fixed", "client", 3610.0).admitted);

        let verdict = dispatcher.decide_at("/fixed", "client", 3615.0);
        assert!(!verdict.admitted);
        assert_eq!(verdict.reason, Reason::WindowExhausted);
        assert_eq!(verdict.retry_after, Some(Duration::from_secs(45)));

        // The next window admits again.
        assert!(dispatcher.decide_at("/fixed", "client", 3660.0).admitted);
    }

    #[test]
    fn test_sliding_rejection_points_at_the_boundary() {
        let dispatcher = build_dispatcher();

        assert!(dispatcher.decide_at("/sliding", "client", 3600.0).admitted);
        assert!(dispatcher.decide_at("/sliding", "client", 3600.0).admitted);

        let verdict = dispatcher.decide_at("/sliding", "client", 3630.0);
        assert!(!verdict.admitted);
        assert_eq!(verdict.reason, Reason::WindowExhausted);
        assert_eq!(verdict.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let dispatcher = build_dispatcher();

        assert!(dispatcher.decide_at("/fixed", "a", 0.0).admitted);
        assert!(dispatcher.decide_at("/fixed", "a", 0.0).admitted);
        assert!(!dispatcher.decide_at("/fixed", "a", 0.0).admitted);

        assert!(dispatcher.decide_at("/fixed", "b", 0.0).admitted);
    }

    #[test]
    fn test_strategies_do_not_share_state() {
        let dispatcher = build_dispatcher();

        // Exhaust the fixed window for this client.
        dispatcher.decide_at("/fixed", "client", 0.0);
        dispatcher.decide_at("/fixed", "client", 0.0);
        assert!(!dispatcher.decide_at("/fixed", "client", 0.0).admitted);

        // The token bucket budget for the same client is untouched.
        assert!(dispatcher.decide_at("/bucket", "client", 0.0).admitted);
    }

    #[test]
    fn test_verdict_serializes_for_the_pipeline() {
        let dispatcher = build_dispatcher();
        dispatcher.decide_at("/fixed", "client", 0.0);
        dispatcher.decide_at("/fixed", "client", 0.0);

        let verdict = dispatcher.decide_at("/fixed", "client", 0.0);
        let json = serde_json::to_value(&verdict).unwrap();

        assert_eq!(json["admitted"], serde_json::json!(false));
        assert_eq!(json["kind"], serde_json::json!("fixed_window"));
        assert_eq!(json["reason"], serde_json::json!("window_exhausted"));
    }

    #[test]
    fn test_evict_idle_sweeps_all_strategies() {
        let dispatcher = build_dispatcher();

        dispatcher.decide_at("/bucket", "client", 0.0);
        dispatcher.decide_at("/fixed", "client", 0.0);
        dispatcher.decide_at("/sliding", "client", 0.0);

        // Everything has been idle far longer than a zero-length grace.
        assert_eq!(dispatcher.evict_idle(Duration::ZERO), 3);
    }
}
