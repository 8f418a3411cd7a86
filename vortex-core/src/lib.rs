//! vortex-core
//!
//! Core domain types and traits shared across the gateway workspace.
//!
//! - `types`: common data structures (`Pair`, `Quote`, `TickRecord`, …).
//! - `connector`: the `UpstreamAdapter` capability trait.
//! - `middleware`: the gateway's auth → rate-limit → route middleware chain.
//! - `stream`: `StreamHandle` lifecycle abstraction for long-lived tasks.
#![warn(missing_docs)]

/// The `UpstreamAdapter` capability trait for a single market-data provider.
pub mod connector;
/// Middleware trait for wrapping the client gateway's request pipeline.
pub mod middleware;
/// Internal stream utilities used by `StreamHandle` and tests.
pub mod stream;
/// Core domain types: `Pair`, `Quote`, `TickRecord`, `TenantContext`, etc.
pub mod types;

pub use connector::{HistoryRequest, UpstreamAdapter};
pub use middleware::{GatewayRequest, Middleware, MiddlewarePosition, RequestHandler};
pub use stream::StreamHandle;
pub use types::*;
