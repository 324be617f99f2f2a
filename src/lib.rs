//! Tollgate - In-Process Admission Control
//!
//! This crate implements a per-request admission-control engine: given a
//! request path and a client identity string, it returns an admit/reject
//! verdict based on per-client rate budgets. Three strategies are
//! available per route: token bucket (continuous refill), fixed window
//! (discrete epoch counters), and sliding window (a weighted blend of two
//! adjacent fixed windows). A route policy maps path prefixes to
//! strategies with an exemption list that always wins, and a single
//! dispatcher ties it together for the embedding request pipeline.
//!
//! The engine performs no I/O, holds all state in process memory, and
//! decides synchronously; serving HTTP and turning verdicts into
//! responses is the caller's job.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod strategy;

pub use config::EngineConfig;
pub use dispatch::{Dispatcher, Reason, Verdict};
pub use error::{Result, TollgateError};
pub use policy::RoutePolicy;
pub use strategy::{FixedWindow, SlidingWindow, StrategyKind, TokenBucket};
