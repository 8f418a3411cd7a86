//! vortex-upstream
//!
//! The single upstream adapter implementation: a typed HTTP client for the
//! quotes/history REST surface (C5, module `http`) and the tick ingestor
//! owning the one upstream WebSocket session (C6, module `ws`), combined
//! behind `vortex_core::UpstreamAdapter` in `adapter::VortexAdapter`.
#![warn(missing_docs)]

/// The production `UpstreamAdapter` implementation.
pub mod adapter;
/// Builder helpers for constructing a `VortexAdapter` from configuration.
pub mod builder;
/// Upstream HTTP client (C5).
pub mod http;
/// Tick ingestor (C6): binary frame decoding and WebSocket session
/// lifecycle.
pub mod ws;

pub use adapter::VortexAdapter;
pub use http::UpstreamHttpClient;
pub use ws::{ControlFrame, NoSubscriptions, SessionState, SubscriptionSnapshot, TickEvent, TickIngestor};
