//! Engine configuration loading and assembly.
//!
//! Configuration is declarative YAML: one section of parameters per
//! strategy, a map of path prefixes to strategy selectors, an exemption
//! list, and a default selector. `EngineConfig::build` is the composition
//! root that turns a parsed document into a ready dispatcher.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::error::{Result, TollgateError};
use crate::policy::RoutePolicy;
use crate::strategy::{FixedWindow, SlidingWindow, StrategyKind, TokenBucket};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Token bucket parameters
    #[serde(default)]
    pub token_bucket: TokenBucketConfig,

    /// Fixed window parameters
    #[serde(default)]
    pub fixed_window: WindowConfig,

    /// Sliding window parameters
    #[serde(default)]
    pub sliding_window: WindowConfig,

    /// Path prefix -> strategy selector
    #[serde(default)]
    pub routes: HashMap<String, StrategyKind>,

    /// Exact paths exempt from all limiting
    #[serde(default)]
    pub exempt: Vec<String>,

    /// Strategy for paths matching no configured prefix
    #[serde(rename = "default", default)]
    pub default_kind: StrategyKind,
}

/// Token bucket construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum tokens in a bucket
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Tokens restored per second
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
        }
    }
}

fn default_capacity() -> f64 {
    10.0
}

fn default_refill_rate() -> f64 {
    1.0
}

/// Window strategy construction parameters, shared by the fixed and
/// sliding window strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window duration in seconds
    #[serde(default = "default_window_size")]
    pub window_size: i64,

    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_window_size() -> i64 {
    60
}

fn default_max_requests() -> u64 {
    10
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading engine configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse engine config: {}", e)))
    }

    /// Build the strategies, policy, and dispatcher this configuration
    /// describes. Invalid parameters are rejected here and never reach a
    /// running engine.
    pub fn build(&self) -> Result<Dispatcher> {
        let token_bucket = Arc::new(TokenBucket::new(
            self.token_bucket.capacity,
            self.token_bucket.refill_rate,
        )?);
        let fixed_window = Arc::new(FixedWindow::new(
            self.fixed_window.window_size,
            self.fixed_window.max_requests,
        )?);
        let sliding_window = Arc::new(SlidingWindow::new(
            self.sliding_window.window_size,
            self.sliding_window.max_requests,
        )?);

        let policy = Arc::new(RoutePolicy::new());
        for (prefix, &kind) in &self.routes {
            policy.set_route(prefix, kind);
        }
        for path in &self.exempt {
            policy.exempt(path);
        }
        policy.set_default_kind(self.default_kind);

        info!(
            routes = self.routes.len(),
            exempt = self.exempt.len(),
            default = ?self.default_kind,
            "Engine assembled"
        );

        Ok(Dispatcher::new(
            policy,
            token_bucket,
            fixed_window,
            sliding_window,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();

        assert_eq!(config.token_bucket.capacity, 10.0);
        assert_eq!(config.token_bucket.refill_rate, 1.0);
        assert_eq!(config.fixed_window.window_size, 60);
        assert_eq!(config.fixed_window.max_requests, 10);
        assert_eq!(config.default_kind, StrategyKind::None);
        assert!(config.routes.is_empty());
        assert!(config.exempt.is_empty());
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
token_bucket:
  capacity: 20
  refill_rate: 2.5
fixed_window:
  window_size: 30
  max_requests: 5
sliding_window:
  window_size: 120
  max_requests: 50
routes:
  /api: token_bucket
  /api/search: sliding_window
  /uploads: fixed_window
exempt:
  - /health
  - /metrics
default: none
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.token_bucket.capacity, 20.0);
        assert_eq!(config.token_bucket.refill_rate, 2.5);
        assert_eq!(config.fixed_window.window_size, 30);
        assert_eq!(config.sliding_window.max_requests, 50);
        assert_eq!(config.routes["/api"], StrategyKind::TokenBucket);
        assert_eq!(config.routes["/api/search"], StrategyKind::SlidingWindow);
        assert_eq!(config.exempt, vec!["/health", "/metrics"]);
    }

    #[test]
    fn test_unknown_selector_is_a_load_error() {
        let yaml = r#"
routes:
  /api: leaky_bucket
"#;
        let result = EngineConfig::from_yaml(yaml);
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_build_produces_a_working_dispatcher() {
        let yaml = r#"
fixed_window:
  window_size: 60
  max_requests: 2
routes:
  /api: fixed_window
exempt:
  - /health
"#;
        let dispatcher = EngineConfig::from_yaml(yaml).unwrap().build().unwrap();

        assert!(dispatcher.decide_at("/api/x", "client", 0.0).admitted);
        assert!(dispatcher.decide_at("/api/x", "client", 0.0).admitted);
        assert!(!dispatcher.decide_at("/api/x", "client", 0.0).admitted);
        assert!(dispatcher.decide_at("/health", "client", 0.0).admitted);
        assert!(dispatcher.decide_at("/elsewhere", "client", 0.0).admitted);
    }

    #[test]
    fn test_invalid_parameters_fail_at_build() {
        let yaml = r#"
token_bucket:
  capacity: -1
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.build().is_err());

        let yaml = r#"
fixed_window:
  window_size: 0
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.build().is_err());
    }

    #[test]
    fn test_default_selector_applies_to_unrouted_paths() {
        let yaml = r#"
token_bucket:
  capacity: 1
  refill_rate: 0
default: token_bucket
"#;
        let dispatcher = EngineConfig::from_yaml(yaml).unwrap().build().unwrap();

        assert!(dispatcher.decide_at("/anything", "client", 0.0).admitted);
        assert!(!dispatcher.decide_at("/anything", "client", 0.0).admitted);
    }
}
