use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the Vortex gateway workspace.
///
/// Variants map to the error kinds in the gateway's error handling design:
/// input errors, auth errors, capacity errors, resolution errors, upstream
/// transient errors, and internal invariant violations. Propagation is
/// per-item: a `GatewayError` for one token, subscription, or connection
/// never terminates another's.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    /// No API key was presented on a client connection.
    #[error("missing API key")]
    MissingApiKey,

    /// The presented API key does not match a known, enabled tenant.
    #[error("invalid API key")]
    InvalidApiKey,

    /// A client payload could not be parsed against the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A client requested a `Mode` the gateway does not recognize.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// A streaming operation was attempted on a connection with no active
    /// upstream session (e.g. during upstream re-auth).
    #[error("stream inactive")]
    StreamInactive,

    /// A token has no entry in any resolver catalogue tier.
    #[error("exchange unresolved for token {token}")]
    ExchangeUnresolved {
        /// The token that could not be mapped to an exchange.
        token: u32,
    },

    /// A resolved pair was rejected because the tenant is not entitled to
    /// its exchange.
    #[error("forbidden exchange: {exchange} (token {token})")]
    ForbiddenExchange {
        /// Exchange the tenant is not entitled to.
        exchange: String,
        /// Token on the forbidden exchange.
        token: u32,
    },

    /// The tenant's per-minute rate limit was exceeded.
    #[error("rate limited: limit={limit} window_ms={window_ms}")]
    RateLimited {
        /// Allowed requests per window.
        limit: u32,
        /// Window length in milliseconds.
        window_ms: u64,
    },

    /// The tenant's concurrent-connection or per-socket subscription cap
    /// was reached.
    #[error("capacity exceeded: {what}")]
    CapacityExceeded {
        /// Description of the capacity that was exceeded.
        what: String,
    },

    /// A subscribe request could not be completed.
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// An unsubscribe request could not be completed.
    #[error("unsubscribe failed: {0}")]
    UnsubscribeFailed(String),

    /// A set_mode request could not be completed.
    #[error("set_mode failed: {0}")]
    SetModeFailed(String),

    /// The upstream session is authenticated with an expired or invalid
    /// token. Snapshot paths degrade to nulls; stream paths stay closed
    /// until an out-of-band re-auth event unblocks them.
    #[error("upstream auth expired")]
    UpstreamAuthExpired,

    /// A transient upstream failure (timeout or 5xx) that was retried
    /// within the batcher's bound and ultimately exhausted.
    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    /// The upstream returned 429: distinct from a bare transient failure so
    /// the caller can tell the endpoint gate (C2) to extend its window
    /// before retrying, rather than just waiting for its next tick.
    #[error("upstream throttled: {0}")]
    Throttled(String),

    /// The upstream returned a response that could not be parsed.
    #[error("upstream malformed response: {0}")]
    UpstreamMalformed(String),

    /// The overall request exceeded its configured deadline.
    #[error("request timed out: {0}")]
    RequestTimeout(String),

    /// Unknown/opaque error, retained for completeness.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code surfaced to clients over the push channel, per the
    /// gateway's documented error code set.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::InvalidMode(_) => "invalid_mode",
            Self::StreamInactive => "stream_inactive",
            Self::ExchangeUnresolved { .. } => "exchange_unresolved",
            Self::ForbiddenExchange { .. } => "forbidden_exchange",
            Self::RateLimited { .. } => "rate_limited",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::SubscribeFailed(_) => "subscribe_failed",
            Self::UnsubscribeFailed(_) => "unsubscribe_failed",
            Self::SetModeFailed(_) => "set_mode_failed",
            Self::UpstreamAuthExpired => "upstream_auth_expired",
            Self::UpstreamTransient(_) => "upstream_transient",
            Self::Throttled(_) => "upstream_throttled",
            Self::UpstreamMalformed(_) => "upstream_malformed",
            Self::RequestTimeout(_) => "request_timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Helper: build an `ExchangeUnresolved` error for a token.
    #[must_use]
    pub const fn exchange_unresolved(token: u32) -> Self {
        Self::ExchangeUnresolved { token }
    }

    /// Helper: build a `ForbiddenExchange` error.
    pub fn forbidden_exchange(exchange: impl Into<String>, token: u32) -> Self {
        Self::ForbiddenExchange {
            exchange: exchange.into(),
            token,
        }
    }

    /// Helper: build a `RateLimited` error.
    #[must_use]
    pub const fn rate_limited(limit: u32, window_ms: u64) -> Self {
        Self::RateLimited { limit, window_ms }
    }

    /// Returns true if this error reflects a transient upstream condition
    /// that is safe to retry within the batcher's bound.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamTransient(_) | Self::Throttled(_))
    }
}
