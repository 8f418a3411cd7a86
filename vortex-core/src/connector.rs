use async_trait::async_trait;

use crate::stream::StreamHandle;
use crate::types::{Candle, GatewayError, Pair, Quote, TickRecord};
use vortex_types::{Exchange, Mode};

/// Query bounds for a historical candle fetch.
#[derive(Debug, Clone, Copy)]
pub struct HistoryRequest {
    /// Inclusive start of the requested range (unix seconds).
    pub from: i64,
    /// Inclusive end of the requested range (unix seconds).
    pub to: i64,
    /// Upstream-defined resolution string (e.g. "day", "5minute").
    pub resolution: &'static str,
}

/// The capability set a single upstream market-data provider must
/// implement: resolve a bare token to its exchange, fetch point-in-time
/// quotes, open a live tick subscription, and decode the provider's binary
/// tick wire format.
///
/// The gateway core is provider-agnostic: exactly one concrete
/// `UpstreamAdapter` implementation is wired in per deployment (unlike a
/// multi-provider router, there is no capability-downcasting or priority
/// ordering across adapters here — see `DESIGN.md` for why this trait is
/// deliberately narrower than a general connector interface).
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Stable adapter name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Resolve a bare numeric token to its exchange via the provider's
    /// catalogue. Returns `Ok(None)` when the token is not present in any
    /// catalogue tier (never an error — an absent entry is a normal
    /// outcome, not a provider failure).
    async fn resolve_token(&self, token: u32) -> Result<Option<Exchange>, GatewayError>;

    /// Fetch point-in-time quotes for a batch of already-resolved pairs at
    /// the given mode. The returned map may be missing keys the upstream
    /// did not answer for; callers treat absence as "unknown", not "null
    /// price".
    async fn fetch_quotes(
        &self,
        pairs: &[Pair],
        mode: Mode,
    ) -> Result<std::collections::HashMap<Pair, Quote>, GatewayError>;

    /// Fetch historical candles for a single pair.
    async fn fetch_history(
        &self,
        pair: Pair,
        req: HistoryRequest,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Open (or reuse) the live tick WebSocket session and return a handle
    /// controlling its lifetime. Subscribe/unsubscribe traffic flows
    /// through the sender channel returned by the adapter's own
    /// construction, not through this trait — the trait only models
    /// session lifecycle, per the "three independent actors" design note.
    async fn connect_ws(&self) -> Result<StreamHandle, GatewayError>;

    /// Decode one binary tick frame. Dispatch is purely on `frame.len()`;
    /// an unrecognized length returns `None` and the caller counts and
    /// drops the frame rather than treating it as fatal.
    fn decode_frame(&self, frame: &[u8]) -> Option<TickRecord>;
}
