//! Construct a `VortexAdapter` from a `GatewayConfig`, via a small builder
//! on the connector type itself rather than a generic cross-crate
//! builder — this adapter has exactly one configuration shape,
//! so there is no quota/blacklist composition to express here (that lives
//! in `vortex-middleware` and wraps the request-handler pipeline, not the
//! upstream adapter).

use std::time::Duration;

use vortex_types::GatewayConfig;

use crate::adapter::VortexAdapter;
use crate::http::UpstreamHttpClient;

impl VortexAdapter {
    /// Build the production adapter from an assembled `GatewayConfig`.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let http = UpstreamHttpClient::new(
            config.upstream_base_url.clone(),
            config.upstream_api_key.clone(),
            config.upstream_auth_token.clone(),
            config.batch.upstream_timeout,
        );
        Self::new(
            http,
            config.upstream_ws_url.clone(),
            config.ws.reconnect_backoff,
            config.ws.outbound_queue_capacity.max(1024),
        )
    }

    /// Build an adapter with a caller-provided `reqwest::Client`, useful
    /// when the process wants a shared connection pool across other HTTP
    /// clients.
    #[must_use]
    pub fn with_reqwest_client(config: &GatewayConfig, client: reqwest::Client) -> Self {
        let http = UpstreamHttpClient::with_client(
            client,
            config.upstream_base_url.clone(),
            config.upstream_api_key.clone(),
            config.upstream_auth_token.clone(),
            config.batch.upstream_timeout,
        );
        Self::new(
            http,
            config.upstream_ws_url.clone(),
            config.ws.reconnect_backoff,
            config.ws.outbound_queue_capacity.max(1024),
        )
    }
}

/// Default upstream request timeout used when a caller constructs an
/// `UpstreamHttpClient` outside of a full `GatewayConfig` (e.g. in tests).
#[must_use]
pub fn default_timeout() -> Duration {
    Duration::from_millis(1500)
}
