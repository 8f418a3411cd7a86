//! The concrete `UpstreamAdapter` implementation wired to the Vortex
//! brokerage: combines the HTTP client (C5) and the tick ingestor (C6)
//! behind the narrow trait `vortex-core` defines, per the "one concrete
//! implementation per deployment" design note.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use vortex_core::stream::StreamHandle;
use vortex_core::{GatewayError, HistoryRequest, Pair, Quote, TickRecord, UpstreamAdapter};
use vortex_types::{BackoffConfig, Exchange, Mode};

use crate::http::UpstreamHttpClient;
use crate::ws::{ControlFrame, NoSubscriptions, SubscriptionSnapshot, TickEvent, TickIngestor};

/// Production adapter for the Vortex brokerage: REST quotes/history over
/// `UpstreamHttpClient`, live ticks over `TickIngestor`.
pub struct VortexAdapter {
    http: UpstreamHttpClient,
    ws_url: String,
    reconnect_backoff: BackoffConfig,
    tick_buffer: usize,
    /// Populated once `prepare_ws` constructs the ingestor; the control
    /// sender is how the multiplexer enqueues subscribe/unsubscribe
    /// traffic without reaching into the ingestor's task state.
    control_tx: std::sync::Mutex<Option<mpsc::Sender<ControlFrame>>>,
    /// Populated once `prepare_ws` constructs the ingestor; taken exactly
    /// once by the caller that owns tick dispatch.
    tick_rx: std::sync::Mutex<Option<mpsc::Receiver<TickEvent>>>,
    /// Holds the constructed-but-not-yet-running ingestor between
    /// `prepare_ws` and `start_ws`, so the caller can wire the control
    /// sender into a `Multiplexer` (and build a `SubscriptionSnapshot` over
    /// it) before the supervisor loop starts asking for a replay list.
    ingestor: std::sync::Mutex<Option<TickIngestor>>,
}

impl VortexAdapter {
    /// Build an adapter from its already-constructed HTTP client and the
    /// tick ingestor's tuning.
    #[must_use]
    pub fn new(
        http: UpstreamHttpClient,
        ws_url: impl Into<String>,
        reconnect_backoff: BackoffConfig,
        tick_buffer: usize,
    ) -> Self {
        Self {
            http,
            ws_url: ws_url.into(),
            reconnect_backoff,
            tick_buffer,
            control_tx: std::sync::Mutex::new(None),
            tick_rx: std::sync::Mutex::new(None),
            ingestor: std::sync::Mutex::new(None),
        }
    }

    /// Take the receiver half of the tick-dispatch channel. Available once
    /// after `prepare_ws`/`connect`; the caller (the gateway's dispatch
    /// task) owns it from then on.
    ///
    /// # Panics
    /// Panics if called before connecting, or a second time after the
    /// receiver has already been taken.
    #[must_use]
    pub fn take_tick_receiver(&self) -> mpsc::Receiver<TickEvent> {
        self.tick_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .expect("prepare_ws must be called, and the receiver taken only once")
    }

    /// Sender for subscribe/unsubscribe control frames, available once
    /// `prepare_ws` has been called. Used by the subscription multiplexer
    /// (C7) to enqueue traffic onto the single serializer task that owns
    /// the upstream socket.
    ///
    /// # Panics
    /// Panics if called before `prepare_ws` has constructed the ingestor;
    /// the multiplexer is wired up from this sender before the ingestor
    /// starts running.
    #[must_use]
    pub fn control_sender(&self) -> mpsc::Sender<ControlFrame> {
        self.control_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .expect("prepare_ws must be called before control_sender")
    }

    /// Construct the ingestor and its channels without starting its
    /// supervisor loop, so the caller can wire `control_sender()` into a
    /// `Multiplexer` (and build a `SubscriptionSnapshot` over it) before
    /// any reconnect ever asks for a replay list.
    pub fn prepare_ws(&self) {
        let (ingestor, control_tx, tick_rx) =
            TickIngestor::new(self.ws_url.clone(), self.reconnect_backoff, self.tick_buffer);
        *self
            .control_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(control_tx);
        *self
            .tick_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tick_rx);
        *self
            .ingestor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(ingestor);
    }

    /// Start the prepared ingestor's supervisor loop against `snapshot`,
    /// queried fresh on every connect and reconnect for the subscriptions
    /// to replay.
    ///
    /// # Panics
    /// Panics if `prepare_ws` has not been called, or `start_ws` has
    /// already consumed the prepared ingestor.
    pub fn start_ws(&self, snapshot: Arc<dyn SubscriptionSnapshot>) -> StreamHandle {
        let ingestor = self
            .ingestor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .expect("prepare_ws must be called, and start_ws only once, before start_ws");
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(ingestor.run(snapshot, stop_rx));
        StreamHandle::new(join, stop_tx)
    }

    /// Convenience for callers with no multiplexer to consult (tests,
    /// `UpstreamAdapter::connect_ws`): prepare and start in one step with
    /// nothing to replay.
    pub fn connect(&self) -> StreamHandle {
        self.prepare_ws();
        self.start_ws(Arc::new(NoSubscriptions))
    }
}

#[async_trait]
impl UpstreamAdapter for VortexAdapter {
    fn name(&self) -> &'static str {
        "vortex"
    }

    async fn resolve_token(&self, token: u32) -> Result<Option<Exchange>, GatewayError> {
        self.http.resolve_token(token).await
    }

    async fn fetch_quotes(
        &self,
        pairs: &[Pair],
        mode: Mode,
    ) -> Result<std::collections::HashMap<Pair, Quote>, GatewayError> {
        self.http.quotes(pairs, mode).await
    }

    async fn fetch_history(
        &self,
        pair: Pair,
        req: HistoryRequest,
    ) -> Result<Vec<vortex_core::Candle>, GatewayError> {
        self.http.history(pair, req).await
    }

    async fn connect_ws(&self) -> Result<StreamHandle, GatewayError> {
        Ok(self.connect())
    }

    fn decode_frame(&self, frame: &[u8]) -> Option<TickRecord> {
        crate::ws::decode_frame(frame)
    }
}
