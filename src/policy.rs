//! Route policy resolution: which strategy governs which path.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::strategy::StrategyKind;

/// Maps request paths to rate limiting strategies.
///
/// Resolution is longest-matching-prefix over a mutable route table, with
/// an exemption set of exact paths that always wins. The table is small
/// and scanned on every call rather than cached, which keeps runtime
/// mutation trivially correct. All three structures sit behind their own
/// `RwLock`, so a resolution never observes a partially-written table;
/// reading the table just before or just after a concurrent update is
/// acceptable staleness.
pub struct RoutePolicy {
    /// Path prefix -> strategy for requests under that prefix
    routes: RwLock<HashMap<String, StrategyKind>>,
    /// Exact paths that bypass all limiting
    exempt: RwLock<HashSet<String>>,
    /// Strategy for paths matching no configured prefix
    default_kind: RwLock<StrategyKind>,
}

impl RoutePolicy {
    /// Create an empty policy: no routes, no exemptions, default `None`.
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            exempt: RwLock::new(HashSet::new()),
            default_kind: RwLock::new(StrategyKind::None),
        }
    }

    /// Configure the strategy for a path prefix.
    ///
    /// Reconfiguring an existing prefix overwrites the earlier entry.
    pub fn set_route(&self, prefix: &str, kind: StrategyKind) {
        debug!(prefix = %prefix, kind = ?kind, "Configuring route");
        self.routes.write().insert(prefix.to_owned(), kind);
    }

    /// Configure the same strategy for several path prefixes.
    pub fn set_routes<I, S>(&self, prefixes: I, kind: StrategyKind)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut routes = self.routes.write();
        for prefix in prefixes {
            debug!(prefix = %prefix.as_ref(), kind = ?kind, "Configuring route");
            routes.insert(prefix.as_ref().to_owned(), kind);
        }
    }

    /// Remove the route for a prefix, if one is configured.
    pub fn remove_route(&self, prefix: &str) -> bool {
        self.routes.write().remove(prefix).is_some()
    }

    /// Mark an exact path as exempt from all limiting. Idempotent.
    pub fn exempt(&self, path: &str) {
        debug!(path = %path, "Exempting path from rate limiting");
        self.exempt.write().insert(path.to_owned());
    }

    /// The strategy applied when no prefix matches.
    pub fn default_kind(&self) -> StrategyKind {
        *self.default_kind.read()
    }

    /// Set the strategy applied when no prefix matches.
    pub fn set_default_kind(&self, kind: StrategyKind) {
        debug!(kind = ?kind, "Setting default strategy");
        *self.default_kind.write() = kind;
    }

    /// Resolve the strategy governing a request path.
    ///
    /// Exemption is checked first and always wins; otherwise the longest
    /// configured prefix the path starts with decides, falling back to the
    /// default strategy when nothing matches.
    pub fn resolve(&self, path: &str) -> StrategyKind {
        if self.exempt.read().contains(path) {
            return StrategyKind::None;
        }

        let routes = self.routes.read();
        let mut matched: Option<(&str, StrategyKind)> = None;
        for (prefix, &kind) in routes.iter() {
            if path.starts_with(prefix.as_str()) {
                match matched {
                    Some((best, _)) if best.len() >= prefix.len() => {}
                    _ => matched = Some((prefix.as_str(), kind)),
                }
            }
        }

        matched.map_or_else(|| self.default_kind(), |(_, kind)| kind)
    }

    /// Number of configured route prefixes.
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::new()
    }
}
