//! Vortex mediates between a single upstream brokerage/quote feed and many
//! tenant clients.
//!
//! Overview
//! - Resolves bare instrument tokens and explicit exchange-qualified pairs
//!   against the upstream catalogue, memoizing the mapping (C1).
//! - Paces and coalesces upstream HTTP calls through a distributed gate and
//!   request batcher so many tenants share one well-behaved upstream client
//!   (C2, C3).
//! - Serves last-price snapshots from a two-tier cache with upstream
//!   fallback when the cache is stale or empty (C4).
//! - Ingests the upstream's live tick feed once and fans it out to every
//!   subscribed client connection through a capped subscription multiplexer
//!   (C6, C7).
//! - Composes all of the above behind a staged-fallback LTP lookup and a
//!   client-facing HTTP/WebSocket surface, wrapped in per-tenant auth and
//!   rate-limit middleware (C8, C9).
//!
//! Key behaviors and trade-offs
//! - LTP lookup degrades in stages: resolve → batch fetch → cache fallback →
//!   one targeted re-probe → null. It never fabricates a price; a stale or
//!   entirely missing quote surfaces as `null`, not a synthesized value.
//! - The upstream socket subscription count is capped independently of how
//!   many client connections multiplex onto it; new client subscriptions are
//!   rejected once the cap is reached rather than silently dropping an
//!   existing one.
//! - A slow client's outbound tick queue drops its own oldest entry rather
//!   than applying backpressure to the tick ingestor or other clients.
#![warn(missing_docs)]

mod batcher;
pub mod config;
pub mod core;
pub mod gateway;
pub mod middleware;
mod multiplexer;
mod outbound;
mod resolver;
mod router;
pub mod tenants;

pub use core::{Gateway, GatewayBuilder, LtpKey};
pub use gateway::{app, AppState};
pub use middleware::{tenant_of, AuthMiddleware, RateLimitMiddleware};
pub use multiplexer::MultiplexerSnapshot;
pub use router::GatewayRouter;
pub use tenants::{StaticTenantDirectory, TenantDirectory};

pub use vortex_core::{
    Candle, GatewayError, GatewayRequest, HistoryRequest, Ohlc, Pair, Quote, TenantContext, TickRecord, UpstreamAdapter,
};
pub use vortex_middleware::{HandlerBuilder, LocalStore, RedisStore, SharedStore};
pub use vortex_types::{Exchange, GatewayConfig, Mode};
pub use vortex_upstream::{ControlFrame, VortexAdapter};
