//! Tick ingestor (C6): the single upstream WebSocket session, structured the
//! way the pack's `barter-data` crate builds exchange sessions (connect →
//! split sink/stream → spawn a serializer task that owns outbound writes →
//! read loop decoding binary frames), with the binary tick layout matching
//! the little-endian, frame-length-keyed records this gateway's upstream
//! actually sends — frame length is the only dispatch discriminant, never
//! a type byte.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use vortex_core::{Ohlc, TickRecord};
use vortex_types::BackoffConfig;

/// Byte length of an LTP record (token, last price, exchange timestamp).
pub const LTP_LEN: usize = 22;
/// Byte length of an OHLCV record (LTP fields plus OHLC and volume).
pub const OHLCV_LEN: usize = 62;
/// Byte length of a full record (OHLCV fields plus five-level depth).
pub const FULL_LEN: usize = 266;

/// Decode a single binary tick frame. Dispatch is purely on `frame.len()`;
/// an unrecognized length returns `None` so the caller can count and drop
/// it without treating the frame as fatal.
#[must_use]
pub fn decode_frame(frame: &[u8]) -> Option<TickRecord> {
    match frame.len() {
        LTP_LEN => {
            let token = LittleEndian::read_u32(&frame[0..4]);
            let last_price = f64::from(LittleEndian::read_i32(&frame[4..8])) / 100.0;
            let exchange_timestamp = LittleEndian::read_i64(&frame[8..16]);
            Some(TickRecord::Ltp {
                token,
                last_price,
                exchange_timestamp,
            })
        }
        OHLCV_LEN => {
            let token = LittleEndian::read_u32(&frame[0..4]);
            let last_price = f64::from(LittleEndian::read_i32(&frame[4..8])) / 100.0;
            let volume = u64::from(LittleEndian::read_u32(&frame[8..12]));
            let open = f64::from(LittleEndian::read_i32(&frame[12..16])) / 100.0;
            let high = f64::from(LittleEndian::read_i32(&frame[16..20])) / 100.0;
            let low = f64::from(LittleEndian::read_i32(&frame[20..24])) / 100.0;
            let close = f64::from(LittleEndian::read_i32(&frame[24..28])) / 100.0;
            let exchange_timestamp = LittleEndian::read_i64(&frame[28..36]);
            Some(TickRecord::Ohlcv {
                token,
                last_price,
                volume,
                ohlc: Ohlc { open, high, low, close },
                exchange_timestamp,
            })
        }
        FULL_LEN => {
            let token = LittleEndian::read_u32(&frame[0..4]);
            let last_price = f64::from(LittleEndian::read_i32(&frame[4..8])) / 100.0;
            let volume = u64::from(LittleEndian::read_u32(&frame[8..12]));
            let open = f64::from(LittleEndian::read_i32(&frame[12..16])) / 100.0;
            let high = f64::from(LittleEndian::read_i32(&frame[16..20])) / 100.0;
            let low = f64::from(LittleEndian::read_i32(&frame[20..24])) / 100.0;
            let close = f64::from(LittleEndian::read_i32(&frame[24..28])) / 100.0;
            let exchange_timestamp = LittleEndian::read_i64(&frame[28..36]);

            let mut bid_prices = [0.0; 5];
            let mut ask_prices = [0.0; 5];
            for i in 0..5 {
                let off = 36 + i * 8;
                bid_prices[i] = f64::from(LittleEndian::read_i32(&frame[off..off + 4])) / 100.0;
            }
            for i in 0..5 {
                let off = 76 + i * 8;
                ask_prices[i] = f64::from(LittleEndian::read_i32(&frame[off..off + 4])) / 100.0;
            }

            Some(TickRecord::Full {
                token,
                last_price,
                volume,
                ohlc: Ohlc { open, high, low, close },
                exchange_timestamp,
                bid_prices,
                ask_prices,
            })
        }
        _ => None,
    }
}

/// One control message enqueued onto the serializer task that owns the
/// single outbound write half of the upstream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Subscribe (or change the mode of) a pair.
    Subscribe {
        /// Exchange segment.
        exchange: vortex_types::Exchange,
        /// Instrument token.
        token: u32,
        /// Requested mode.
        mode: vortex_types::Mode,
    },
    /// Unsubscribe a pair entirely.
    Unsubscribe {
        /// Exchange segment.
        exchange: vortex_types::Exchange,
        /// Instrument token.
        token: u32,
    },
}

impl ControlFrame {
    fn to_json(self) -> serde_json::Value {
        match self {
            Self::Subscribe { exchange, token, mode } => serde_json::json!({
                "exchange": exchange.as_str(),
                "token": token,
                "mode": mode.to_string(),
                "message_type": "subscribe",
            }),
            Self::Unsubscribe { exchange, token } => serde_json::json!({
                "exchange": exchange.as_str(),
                "token": token,
                "message_type": "unsubscribe",
            }),
        }
    }
}

/// Queried every time the session (re)enters `Connected`, so a fresh
/// connect or reconnect always replays the currently-registered upstream
/// subscriptions before any tick is delivered — the multiplexer (C7) owns
/// the refcount table the ingestor has no other way to see, per the
/// "three independent actors" design note, so this is its one sanctioned
/// read into that state.
#[async_trait]
pub trait SubscriptionSnapshot: Send + Sync {
    /// Every currently-registered upstream pair, each at its effective mode.
    async fn snapshot(&self) -> Vec<ControlFrame>;
}

/// A snapshot source with nothing to replay, for connections opened before
/// any multiplexer exists to consult (tests, `UpstreamAdapter::connect_ws`).
pub struct NoSubscriptions;

#[async_trait]
impl SubscriptionSnapshot for NoSubscriptions {
    async fn snapshot(&self) -> Vec<ControlFrame> {
        Vec::new()
    }
}

/// Connection lifecycle state, driven by a single supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No active connection; a reconnect attempt may be scheduled.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// TCP/TLS/WS handshake succeeded; resubscription has not yet replayed.
    Connected,
    /// Registered subscriptions have been replayed; ticks are flowing.
    Streaming,
}

/// A decoded tick paired with the moment the ingestor observed it, handed
/// to the cache write-through and the multiplexer's dispatch path.
#[derive(Debug, Clone, Copy)]
pub struct TickEvent {
    /// The decoded record.
    pub record: TickRecord,
}

/// Owns the single upstream WebSocket session. `replay` is invoked every
/// time the session (re)enters `Streaming`, so the caller can resend every
/// currently-registered subscription with its effective mode.
pub struct TickIngestor {
    ws_url: String,
    backoff: BackoffConfig,
    control_rx: mpsc::Receiver<ControlFrame>,
    tick_tx: mpsc::Sender<TickEvent>,
    unknown_frame_count: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl TickIngestor {
    /// Build a new ingestor. Returns the ingestor plus the sender half of
    /// the control queue (handed to the multiplexer) and the receiver half
    /// of the tick-dispatch channel (handed to the dispatcher).
    #[must_use]
    pub fn new(
        ws_url: impl Into<String>,
        backoff: BackoffConfig,
        tick_buffer: usize,
    ) -> (Self, mpsc::Sender<ControlFrame>, mpsc::Receiver<TickEvent>) {
        let (control_tx, control_rx) = mpsc::channel(1024);
        let (tick_tx, tick_rx) = mpsc::channel(tick_buffer);
        let ingestor = Self {
            ws_url: ws_url.into(),
            backoff,
            control_rx,
            tick_tx,
            unknown_frame_count: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
        };
        (ingestor, control_tx, tick_rx)
    }

    /// Number of binary frames dropped for having an unrecognized length.
    #[must_use]
    pub fn unknown_frame_count(&self) -> u64 {
        self.unknown_frame_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Run the supervisor loop: connect, replay every currently-registered
    /// subscription (queried fresh from `snapshot` on every connect and
    /// reconnect), stream, and reconnect with backoff on any disconnect,
    /// until `stop_rx` fires.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(url = %self.ws_url)))]
    pub async fn run(
        mut self,
        snapshot: Arc<dyn SubscriptionSnapshot>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }

            #[cfg(feature = "tracing")]
            tracing::info!(state = ?SessionState::Connecting, "connecting to upstream tick feed");

            match tokio_tungstenite::connect_async(&self.ws_url).await {
                Ok((stream, _response)) => {
                    attempt = 0;
                    let (mut write, mut read) = stream.split();

                    for frame in snapshot.snapshot().await {
                        let text = frame.to_json().to_string();
                        if write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    #[cfg(feature = "tracing")]
                    tracing::info!(state = ?SessionState::Streaming, "upstream tick feed streaming");

                    let streaming_since = tokio::time::Instant::now();
                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut stop_rx => return,
                            ctrl = self.control_rx.recv() => {
                                match ctrl {
                                    Some(frame) => {
                                        let text = frame.to_json().to_string();
                                        if write.send(Message::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    None => return,
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Binary(data))) => {
                                        self.dispatch_frame(&data).await;
                                    }
                                    Some(Ok(Message::Ping(payload))) => {
                                        let _ = write.send(Message::Pong(payload)).await;
                                    }
                                    Some(Ok(Message::Close(_))) | None => break,
                                    Some(Ok(_)) => {}
                                    Some(Err(_)) => break,
                                }
                            }
                        }
                        if streaming_since.elapsed() >= Duration::from_secs(30) {
                            attempt = 0;
                        }
                    }
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "upstream tick feed connect failed");
                }
            }

            let delay = self.next_backoff(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = &mut stop_rx => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn dispatch_frame(&self, data: &[u8]) {
        // Concatenated records are delivered back to back; each record's
        // own length determines where the next one starts.
        for chunk in split_concatenated_records(data) {
            match decode_frame(chunk) {
                Some(record) => {
                    let _ = self.tick_tx.send(TickEvent { record }).await;
                }
                None => {
                    self.unknown_frame_count
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
    }

    fn next_backoff(&self, attempt: u32) -> Duration {
        let base = self
            .backoff
            .min_backoff_ms
            .saturating_mul(u64::from(self.backoff.factor.saturating_pow(attempt)))
            .min(self.backoff.max_backoff_ms);
        let jitter_span = base.saturating_mul(u64::from(self.backoff.jitter_percent)) / 100;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand::random_range(0..=jitter_span)
        };
        Duration::from_millis(base + jitter)
    }
}

/// Split a possibly-concatenated binary WS message into the individual
/// fixed-length records it carries. A single message may bundle several
/// ticks; any trailing bytes that don't match a known record length are
/// treated as one final unknown-length chunk so the caller's counter still
/// fires.
fn split_concatenated_records(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let remaining = data.len() - offset;
        let take = [LTP_LEN, OHLCV_LEN, FULL_LEN]
            .into_iter()
            .find(|&len| len <= remaining && decode_frame(&data[offset..offset + len]).is_some());
        match take {
            Some(len) => {
                out.push(&data[offset..offset + len]);
                offset += len;
            }
            None => {
                out.push(&data[offset..]);
                break;
            }
        }
    }
    out
}
