//! Subscription multiplexer (C7): the N-to-1 mapping from client
//! subscriptions onto a capped set of upstream socket subscriptions.
//!
//! Owns the refcount table exclusively (per the "three independent actors"
//! design note: the multiplexer owns refcounts, the ingestor owns the
//! socket, the gateway owns connection state — none reaches into another's
//! state synchronously). Subscribe/unsubscribe traffic to the upstream
//! socket is serialized through the bounded `mpsc` channel the ingestor
//! drains, so out-of-order control frames for the same pair are impossible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
#[cfg(feature = "tracing")]
use tracing::warn;

use vortex_core::{GatewayError, Pair, TickRecord};
use vortex_types::{Exchange, Mode};
use vortex_upstream::{ControlFrame, SubscriptionSnapshot};

use crate::outbound::OutboundQueue;

/// Identifies one client connection to the multiplexer. Opaque outside this
/// module; handed out by `Multiplexer::new_client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    /// Recover the client id a `GatewayRequest::for_connection` call
    /// carried, to route a connection-scoped event back to its
    /// multiplexer state. Only ids minted by `new_client` for the same
    /// connection are ever passed back in, so this never forges a foreign
    /// connection's identity.
    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }

    /// The raw id, attached to a `GatewayRequest` at WS accept time.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

struct UpstreamEntry {
    mode: Mode,
    refcount: u32,
}

#[derive(Default)]
struct State {
    upstream: HashMap<Pair, UpstreamEntry>,
    /// Reverse index from a tick's bare token (all a `TickRecord` carries)
    /// back to the exchange needed to rebuild a `Pair` for cache/dispatch
    /// lookups. Mirrors `upstream`'s keys exactly.
    token_index: HashMap<u32, Exchange>,
    clients: HashMap<ClientId, HashMap<Pair, Mode>>,
    connections: HashMap<ClientId, Arc<OutboundQueue<TickRecord>>>,
}

/// Maintains the client-sub → upstream-sub mapping and the serialized queue
/// of subscribe/unsubscribe frames sent to the tick ingestor.
pub struct Multiplexer {
    control_tx: mpsc::Sender<ControlFrame>,
    max_subs: usize,
    next_client_id: AtomicU64,
    state: Mutex<State>,
}

impl Multiplexer {
    /// Construct a multiplexer writing control frames onto `control_tx`
    /// (the sender half returned by the upstream adapter's `connect_ws`)
    /// and capping distinct upstream pairs at `max_subs`.
    #[must_use]
    pub fn new(control_tx: mpsc::Sender<ControlFrame>, max_subs: usize) -> Self {
        Self {
            control_tx,
            max_subs,
            next_client_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Mint a fresh client id for a newly accepted connection.
    pub fn new_client(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register (or update the mode of) `pair` for `client`.
    ///
    /// Enqueues an upstream subscribe frame when the pair transitions from
    /// no subscribers to one, or when this registration strengthens the
    /// pair's effective mode. Enforces the per-socket subscription cap by
    /// rejecting brand-new pairs once `max_subs` distinct pairs are already
    /// registered.
    pub async fn register(&self, client: ClientId, pair: Pair, mode: Mode) -> Result<(), GatewayError> {
        let frame_to_send = {
            let mut state = self.state.lock().await;

            let client_subs = state.clients.entry(client).or_default();
            let already_subscribed_by_client = client_subs.contains_key(&pair);

            if !already_subscribed_by_client
                && !state.upstream.contains_key(&pair)
                && state.upstream.len() >= self.max_subs
            {
                return Err(GatewayError::CapacityExceeded {
                    what: format!("upstream socket subscription cap ({}) reached", self.max_subs),
                });
            }

            client_subs.insert(pair, mode);

            let entry = state.upstream.entry(pair).or_insert(UpstreamEntry { mode, refcount: 0 });
            let became_active = entry.refcount == 0;
            if became_active {
                state.token_index.insert(pair.token(), pair.exchange());
            }
            if !already_subscribed_by_client {
                entry.refcount += 1;
            }
            let strengthened = mode > entry.mode;
            if strengthened {
                entry.mode = mode;
            }

            if became_active || strengthened {
                Some(ControlFrame::Subscribe { exchange: pair.exchange(), token: pair.token(), mode: entry.mode })
            } else {
                None
            }
        };

        if let Some(frame) = frame_to_send {
            self.send_control(frame).await;
        }
        Ok(())
    }

    /// Unregister `pair` for `client`. Enqueues an upstream unsubscribe
    /// frame when the pair's refcount drops to zero.
    pub async fn unregister(&self, client: ClientId, pair: Pair) {
        let frame_to_send = {
            let mut state = self.state.lock().await;
            let Some(client_subs) = state.clients.get_mut(&client) else { return };
            if client_subs.remove(&pair).is_none() {
                return;
            }
            let mut drop_entry = false;
            let mut frame = None;
            if let Some(entry) = state.upstream.get_mut(&pair) {
                entry.refcount = entry.refcount.saturating_sub(1);
                if entry.refcount == 0 {
                    drop_entry = true;
                    frame = Some(ControlFrame::Unsubscribe { exchange: pair.exchange(), token: pair.token() });
                }
            }
            if drop_entry {
                state.upstream.remove(&pair);
                state.token_index.remove(&pair.token());
            }
            frame
        };
        if let Some(frame) = frame_to_send {
            self.send_control(frame).await;
        }
    }

    /// Adjust `client`'s mode for an already-registered `pair` and
    /// recompute the effective upstream mode (the max over every client
    /// subscribed to it); resends a subscribe frame if the effective mode
    /// changed, since upstream semantics treat a resent subscribe as a mode
    /// update.
    pub async fn set_mode(&self, client: ClientId, pair: Pair, mode: Mode) -> Result<(), GatewayError> {
        let frame_to_send = {
            let mut state = self.state.lock().await;
            let client_subs = state
                .clients
                .get_mut(&client)
                .filter(|subs| subs.contains_key(&pair))
                .ok_or_else(|| GatewayError::SetModeFailed(format!("{} is not subscribed for this client", pair.wire())))?;
            client_subs.insert(pair, mode);

            let effective = state
                .clients
                .values()
                .filter_map(|subs| subs.get(&pair).copied())
                .max();
            let Some(effective) = effective else { return Ok(()) };

            let Some(entry) = state.upstream.get_mut(&pair) else { return Ok(()) };
            if entry.mode == effective {
                None
            } else {
                entry.mode = effective;
                Some(ControlFrame::Subscribe { exchange: pair.exchange(), token: pair.token(), mode: effective })
            }
        };
        if let Some(frame) = frame_to_send {
            self.send_control(frame).await;
        }
        Ok(())
    }

    /// List `client`'s current subscriptions as `(pair, mode)` pairs.
    pub async fn list(&self, client: ClientId) -> Vec<(Pair, Mode)> {
        let state = self.state.lock().await;
        state
            .clients
            .get(&client)
            .map(|subs| subs.iter().map(|(&p, &m)| (p, m)).collect())
            .unwrap_or_default()
    }

    /// Tear down every subscription `client` holds, as on disconnect.
    pub async fn unregister_all(&self, client: ClientId) {
        let pairs: Vec<Pair> = self.list(client).await.into_iter().map(|(p, _)| p).collect();
        for pair in pairs {
            self.unregister(client, pair).await;
        }
        let mut state = self.state.lock().await;
        state.clients.remove(&client);
    }

    /// Number of distinct pairs currently registered with the upstream
    /// socket, for metrics/tests.
    pub async fn active_pair_count(&self) -> usize {
        self.state.lock().await.upstream.len()
    }

    /// Attach `client`'s outbound tick queue, read by its WebSocket writer
    /// task. Call once at connection accept, before any `register`.
    pub async fn register_connection(&self, client: ClientId, queue: Arc<OutboundQueue<TickRecord>>) {
        self.state.lock().await.connections.insert(client, queue);
    }

    /// Drop `client`'s outbound queue. Call on disconnect, alongside
    /// `unregister_all`.
    pub async fn remove_connection(&self, client: ClientId) {
        self.state.lock().await.connections.remove(&client);
    }

    /// Recover the `Pair` a raw tick's bare token belongs to, so a tick
    /// ingestor task can write it through the cache (C4) keyed the same way
    /// `quotes`/`ltp` requests are.
    pub async fn pair_for_token(&self, token: u32) -> Option<Pair> {
        let state = self.state.lock().await;
        state.token_index.get(&token).map(|&exchange| Pair::new(exchange, token))
    }

    /// Fan a decoded tick out to every connection currently subscribed to
    /// its pair. Delivery is best-effort per connection: a slow client's
    /// queue drops its own oldest entry (`OutboundQueue`) rather than
    /// blocking this call, so one slow reader never stalls the ingestor or
    /// other clients.
    pub async fn dispatch(&self, tick: TickRecord) {
        let state = self.state.lock().await;
        let Some(&exchange) = state.token_index.get(&tick.token()) else { return };
        let pair = Pair::new(exchange, tick.token());
        for (client, subs) in &state.clients {
            if subs.contains_key(&pair) {
                if let Some(queue) = state.connections.get(client) {
                    queue.push(tick.clone());
                }
            }
        }
    }

    async fn send_control(&self, frame: ControlFrame) {
        if self.control_tx.send(frame).await.is_err() {
            #[cfg(feature = "tracing")]
            warn!("control frame dropped: tick ingestor channel closed");
        }
    }

    /// Snapshot every currently-registered upstream pair as a subscribe
    /// frame, for the tick ingestor to replay on connect and on every
    /// reconnect. Taken under the same lock as `register`/`unregister`, so
    /// it always reflects a consistent view of the refcount table.
    pub async fn active_subscriptions(&self) -> Vec<ControlFrame> {
        let state = self.state.lock().await;
        state
            .upstream
            .iter()
            .map(|(pair, entry)| ControlFrame::Subscribe { exchange: pair.exchange(), token: pair.token(), mode: entry.mode })
            .collect()
    }
}

/// Adapts a `Multiplexer` to the `SubscriptionSnapshot` the tick ingestor
/// queries fresh on every connect and reconnect, so a subscription
/// established after the very first connect is still replayed when the
/// upstream socket drops and comes back.
pub struct MultiplexerSnapshot(pub Arc<Multiplexer>);

#[async_trait]
impl SubscriptionSnapshot for MultiplexerSnapshot {
    async fn snapshot(&self) -> Vec<ControlFrame> {
        self.0.active_subscriptions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vortex_types::Exchange;

    fn setup() -> (Multiplexer, mpsc::Receiver<ControlFrame>) {
        let (tx, rx) = mpsc::channel(16);
        (Multiplexer::new(tx, 1000), rx)
    }

    #[tokio::test]
    async fn first_registration_sends_subscribe_and_refcount_is_one() {
        let (mux, mut rx) = setup();
        let client = mux.new_client();
        let pair = Pair::new(Exchange::NseEq, 26000);
        mux.register(client, pair, Mode::Ltp).await.unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ControlFrame::Subscribe { token: 26000, .. }));
        assert_eq!(mux.active_pair_count().await, 1);
    }

    #[tokio::test]
    async fn second_client_same_pair_does_not_resend_subscribe_at_same_mode() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let c1 = mux.new_client();
        let c2 = mux.new_client();
        mux.register(c1, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        mux.register(c2, pair, Mode::Ltp).await.unwrap();
        assert!(rx.try_recv().is_err(), "no new subscribe frame for an unchanged effective mode");
    }

    #[tokio::test]
    async fn stronger_mode_from_second_client_resends_subscribe() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let c1 = mux.new_client();
        let c2 = mux.new_client();
        mux.register(c1, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        mux.register(c2, pair, Mode::Full).await.unwrap();
        let frame = rx.try_recv().unwrap();
        assert!(matches!(frame, ControlFrame::Subscribe { mode: Mode::Full, .. }));
    }

    #[tokio::test]
    async fn unregister_last_client_sends_unsubscribe() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let client = mux.new_client();
        mux.register(client, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        mux.unregister(client, pair).await;
        assert!(matches!(rx.try_recv().unwrap(), ControlFrame::Unsubscribe { token: 26000, .. }));
        assert_eq!(mux.active_pair_count().await, 0);
    }

    #[tokio::test]
    async fn idempotent_resubscribe_does_not_double_refcount() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let client = mux.new_client();
        mux.register(client, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        mux.register(client, pair, Mode::Ltp).await.unwrap();
        assert!(rx.try_recv().is_err());
        mux.unregister(client, pair).await;
        assert_eq!(mux.active_pair_count().await, 0, "single unregister must fully clear a client's one logical sub");
    }

    #[tokio::test]
    async fn capacity_cap_rejects_new_pairs_once_full() {
        let (tx, _rx) = mpsc::channel(4096);
        let mux = Multiplexer::new(tx, 1);
        let client = mux.new_client();
        mux.register(client, Pair::new(Exchange::NseEq, 1), Mode::Ltp).await.unwrap();
        let err = mux.register(client, Pair::new(Exchange::NseEq, 2), Mode::Ltp).await.unwrap_err();
        assert_eq!(err.code(), "capacity_exceeded");
    }

    #[tokio::test]
    async fn unregister_all_clears_every_sub_for_a_client() {
        let (mux, mut rx) = setup();
        let client = mux.new_client();
        mux.register(client, Pair::new(Exchange::NseEq, 1), Mode::Ltp).await.unwrap();
        mux.register(client, Pair::new(Exchange::NseEq, 2), Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        rx.try_recv().unwrap();
        mux.unregister_all(client).await;
        assert_eq!(mux.active_pair_count().await, 0);
        assert!(mux.list(client).await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_delivers_only_to_subscribed_connections() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let subscribed = mux.new_client();
        let other = mux.new_client();
        mux.register(subscribed, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();

        let queue = Arc::new(OutboundQueue::new(8));
        mux.register_connection(subscribed, queue.clone()).await;
        let other_queue = Arc::new(OutboundQueue::new(8));
        mux.register_connection(other, other_queue.clone()).await;

        let tick = TickRecord::Ltp { token: 26000, last_price: 100.5, exchange_timestamp: 0 };
        mux.dispatch(tick).await;

        assert_eq!(queue.pop().await.token(), 26000);
        assert_eq!(other_queue.dropped_count(), 0);
    }

    #[tokio::test]
    async fn pair_for_token_resolves_after_registration_and_clears_after_unregister() {
        let (mux, mut rx) = setup();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let client = mux.new_client();
        mux.register(client, pair, Mode::Ltp).await.unwrap();
        rx.try_recv().unwrap();
        assert_eq!(mux.pair_for_token(26000).await, Some(pair));
        mux.unregister(client, pair).await;
        assert_eq!(mux.pair_for_token(26000).await, None);
    }
}
