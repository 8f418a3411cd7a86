//! Configuration types for the Vortex gateway, assembled once at startup into
//! a single immutable `GatewayConfig` and passed by reference into every
//! component at construction (per the design note against scattered global
//! config reads).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff configuration, shared by upstream HTTP retries and
/// WebSocket reconnects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Minimum backoff delay in milliseconds.
    pub min_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Exponential factor applied after each failure (>= 1).
    pub factor: u32,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 500,
            max_backoff_ms: 60_000,
            factor: 2,
            jitter_percent: 20,
        }
    }
}

/// Request batcher (C3) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of pairs coalesced into a single upstream HTTP call.
    pub max_chunk: usize,
    /// Coalescing window before a pending batch is dispatched.
    pub coalesce_window: Duration,
    /// Per-request deadline for upstream HTTP calls.
    pub upstream_timeout: Duration,
    /// Backoff applied to retried upstream HTTP calls.
    pub backoff: BackoffConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk: 1000,
            coalesce_window: Duration::from_millis(50),
            upstream_timeout: Duration::from_millis(1500),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Distributed endpoint gate (C2) tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum spacing enforced between successful acquisitions for the same
    /// endpoint, across all processes sharing the coordination store.
    pub interval: Duration,
    /// Random jitter added to the gate's release, in milliseconds (0-250).
    pub jitter_ms: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            jitter_ms: 50,
        }
    }
}

/// Quote cache (C4) tuning: the in-memory moka tier plus the shared-store
/// last-tick tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for the in-process memory tier.
    pub memory_ttl: Duration,
    /// Maximum number of entries held in the in-process memory tier.
    pub memory_max: u64,
    /// TTL applied to `last_tick:{token}` keys in the shared store.
    pub tick_ttl: Duration,
    /// TTL applied to the resolver's token→exchange memoization.
    pub resolver_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl: Duration::from_millis(5000),
            memory_max: 10_000,
            tick_ttl: Duration::from_millis(10_000),
            resolver_ttl: Duration::from_secs(60),
        }
    }
}

/// Tick ingestor (C6) and multiplexer (C7) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Upstream WebSocket endpoint.
    pub upstream_ws_url: String,
    /// Maximum number of distinct pairs with a non-zero refcount at once.
    pub max_subs: usize,
    /// Backoff applied between reconnect attempts.
    pub reconnect_backoff: BackoffConfig,
    /// Per-event-name requests-per-second caps enforced on client push
    /// channel traffic (subscribe/unsubscribe/set_mode/etc).
    pub per_event_rps: HashMap<String, u32>,
    /// Capacity of the per-connection outbound tick queue; the queue drops
    /// the oldest entry when full rather than blocking the ingestor.
    pub outbound_queue_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            upstream_ws_url: String::new(),
            max_subs: 1000,
            reconnect_backoff: BackoffConfig::default(),
            per_event_rps: HashMap::new(),
            outbound_queue_capacity: 256,
        }
    }
}

/// Global, immutable configuration for the Vortex gateway, assembled once at
/// startup from environment variables (optionally overridden by a `--config`
/// TOML file) and shared by `Arc` into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upstream REST base URL, e.g. `https://api.vortex.example/data`.
    pub upstream_base_url: String,
    /// Upstream WebSocket URL, e.g. `wss://ws.vortex.example/feed`.
    pub upstream_ws_url: String,
    /// Static upstream API key sent as `x-api-key`.
    pub upstream_api_key: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub upstream_auth_token: String,
    /// Request batcher tuning.
    pub batch: BatchConfig,
    /// Distributed endpoint gate tuning.
    pub gate: GateConfig,
    /// Quote cache tuning.
    pub cache: CacheConfig,
    /// Tick ingestor / multiplexer tuning.
    pub ws: WsConfig,
    /// Default deadline for a snapshot (`/ltp`, `/quotes`) request.
    pub snapshot_deadline: Duration,
    /// Address the client-facing HTTP/WS gateway binds to.
    pub listen_addr: String,
    /// Address of the shared coordination store (redis URL). `None` means
    /// the gate and shared cache tier run in local-only degrade mode.
    pub coordination_store_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: String::new(),
            upstream_ws_url: String::new(),
            upstream_api_key: String::new(),
            upstream_auth_token: String::new(),
            batch: BatchConfig::default(),
            gate: GateConfig::default(),
            cache: CacheConfig::default(),
            ws: WsConfig::default(),
            snapshot_deadline: Duration::from_millis(3000),
            listen_addr: "0.0.0.0:8080".to_string(),
            coordination_store_url: None,
        }
    }
}
