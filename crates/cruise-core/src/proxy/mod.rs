//! Proxy engine: HTTP surface, request metering, streaming pass-through.

pub mod handlers;
pub mod meter;
pub mod server;
pub mod streaming;

pub use server::{build_proxy_router, AppState, ProxyServer};
