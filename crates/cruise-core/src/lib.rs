//! Core library for the cruise proxy.
//!
//! Cruise sits between a Messages-API client and its provider, meters every
//! request through a durable usage ledger, learns quota ceilings from
//! observed rate-limit events, and silently reroutes traffic to cheaper or
//! alternate providers before the ceiling is hit.
//!
//! Component layers, leaves first:
//! - [`ledger`] — the durable store every other decision is derived from
//! - [`limits`] — learned per-model quota ceilings
//! - [`velocity`] — windowed consumption rate and pattern classification
//! - [`prediction`] — combines the above into a [`cruise_types::models::Prediction`]
//! - [`router`] — threshold cascade and rate-limit fallback
//! - [`adapters`] — schema translation per provider kind
//! - [`proxy`] — the HTTP surface and streaming meter

pub mod adapters;
pub mod ledger;
pub mod limits;
pub mod paths;
pub mod prediction;
pub mod proxy;
pub mod router;
pub mod velocity;

pub use ledger::UsageLedger;
pub use limits::LimitLearner;
pub use prediction::PredictionEngine;
pub use proxy::server::{build_proxy_router, AppState, ProxyServer};
pub use router::{RequestRouter, RouteTarget};

/// Current epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
