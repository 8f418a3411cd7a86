//! Request batcher (C3): coalesces concurrent callers into chunked upstream
//! HTTP calls, pacing each chunk through the distributed endpoint gate (C2)
//! before invoking the upstream HTTP client (C5).
//!
//! A staged collect → dispatch → scatter orchestration: callers hand in a
//! request and await a oneshot reply; the first caller into a coalescing
//! window spawns the dispatch task that the rest simply join.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use vortex_core::{GatewayError, HistoryRequest, Pair, Quote, UpstreamAdapter};
use vortex_middleware::{EndpointGate, GateOutcome};
use vortex_types::{BatchConfig, Mode};

use crate::resolver::Resolver;

fn endpoint_for(mode: Mode) -> &'static str {
    match mode {
        Mode::Ltp => "ltp",
        Mode::Ohlcv | Mode::Full => "ohlc",
    }
}

struct PendingBatch {
    pairs: Vec<Pair>,
    waiters: Vec<oneshot::Sender<Result<HashMap<Pair, Quote>, GatewayError>>>,
}

/// Coalesces, chunks, gates, and dispatches quote requests to the single
/// upstream adapter.
pub struct Batcher {
    adapter: Arc<dyn UpstreamAdapter>,
    gate: Arc<EndpointGate>,
    resolver: Arc<Resolver>,
    config: BatchConfig,
    pending: Mutex<HashMap<Mode, PendingBatch>>,
}

impl Batcher {
    /// Construct a batcher wired to the upstream adapter, the gate, the
    /// resolver (needed for the bare-token variants), and its tuning.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn UpstreamAdapter>,
        gate: Arc<EndpointGate>,
        resolver: Arc<Resolver>,
        config: BatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            gate,
            resolver,
            config,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// `ltp(tokens)`: resolve bare tokens then fetch at `Mode::Ltp`. Unresolved
    /// tokens are never sent upstream; they come back as a null quote keyed
    /// by a synthetic pair is not possible (no exchange), so the composer
    /// handles unresolved tokens itself — this method only ever receives
    /// already-resolvable tokens from the composer's partition step.
    pub async fn ltp_by_tokens(self: &Arc<Self>, tokens: &[u32]) -> HashMap<Pair, Quote> {
        let built = self.resolver.build_pairs(tokens).await;
        self.ltp_by_pairs(&built.pairs).await
    }

    /// `ltp_by_pairs(pairs)`: already-resolved pairs, `Mode::Ltp`.
    pub async fn ltp_by_pairs(self: &Arc<Self>, pairs: &[Pair]) -> HashMap<Pair, Quote> {
        self.quotes(pairs, Mode::Ltp).await
    }

    /// `quotes(pairs, mode)`: the general coalescing entry point shared by
    /// every mode.
    pub async fn quotes(self: &Arc<Self>, pairs: &[Pair], mode: Mode) -> HashMap<Pair, Quote> {
        if pairs.is_empty() {
            return HashMap::new();
        }
        let (rx, is_first) = self.join_batch(pairs, mode).await;
        if is_first {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.dispatch(mode).await });
        }
        match rx.await {
            Ok(result) => result.unwrap_or_else(|_err| {
                pairs.iter().map(|&p| (p, Quote::null(chrono::Utc::now()))).collect()
            }),
            Err(_canceled) => pairs.iter().map(|&p| (p, Quote::null(chrono::Utc::now()))).collect(),
        }
    }

    /// History is a single-pair call with no coalescing benefit, but it
    /// still must be paced through the gate like every other upstream
    /// endpoint.
    pub async fn history(self: &Arc<Self>, pair: Pair, req: HistoryRequest) -> Result<Vec<vortex_core::Candle>, GatewayError> {
        self.acquire_gate("history", self.config.upstream_timeout).await?;
        self.call_with_retry("history", || {
            let adapter = self.adapter.clone();
            async move { adapter.fetch_history(pair, req).await }
        })
        .await
    }

    async fn join_batch(
        &self,
        pairs: &[Pair],
        mode: Mode,
    ) -> (oneshot::Receiver<Result<HashMap<Pair, Quote>, GatewayError>>, bool) {
        let mut pending = self.pending.lock().await;
        let (tx, rx) = oneshot::channel();
        let is_first = !pending.contains_key(&mode);
        let batch = pending.entry(mode).or_insert_with(|| PendingBatch { pairs: Vec::new(), waiters: Vec::new() });
        for &pair in pairs {
            if !batch.pairs.contains(&pair) {
                batch.pairs.push(pair);
            }
        }
        batch.waiters.push(tx);
        (rx, is_first)
    }

    async fn dispatch(self: Arc<Self>, mode: Mode) {
        tokio::time::sleep(self.config.coalesce_window).await;

        let batch = {
            let mut pending = self.pending.lock().await;
            pending.remove(&mode)
        };
        let Some(PendingBatch { pairs, waiters }) = batch else {
            return;
        };

        let mut merged: HashMap<Pair, Quote> = HashMap::new();
        for chunk in pairs.chunks(self.config.max_chunk.max(1)) {
            let endpoint = endpoint_for(mode);
            let chunk_vec = chunk.to_vec();
            let result = match self.acquire_gate(endpoint, self.config.upstream_timeout).await {
                Ok(()) => {
                    self.call_with_retry(endpoint, || {
                        let adapter = self.adapter.clone();
                        let chunk_vec = chunk_vec.clone();
                        async move { adapter.fetch_quotes(&chunk_vec, mode).await }
                    })
                    .await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(quotes) => merged.extend(quotes),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    warn!(error = %_err, chunk_len = chunk.len(), "batch chunk failed, surfacing nulls for its tokens");
                    // Chunk failure surfaces as null for its own tokens only;
                    // other chunks (and other callers' pairs) are unaffected.
                }
            }
        }

        let now = chrono::Utc::now();
        let full: HashMap<Pair, Quote> = pairs
            .iter()
            .map(|&p| (p, merged.get(&p).cloned().unwrap_or_else(|| Quote::null(now))))
            .collect();

        for waiter in waiters {
            let _ = waiter.send(Ok(full.clone()));
        }
    }

    /// Acquire `endpoint`'s window before the deadline elapses. Returns
    /// `RequestTimeout` rather than silently falling through once the
    /// deadline is exceeded: a caller that proceeded to call upstream
    /// anyway would bypass the gate's one-acquisition-per-window guarantee
    /// under contention.
    async fn acquire_gate(&self, endpoint: &str, deadline: Duration) -> Result<(), GatewayError> {
        let started = tokio::time::Instant::now();
        loop {
            match self.gate.acquire(endpoint).await {
                GateOutcome::Acquired => return Ok(()),
                GateOutcome::AlreadyHeld => {
                    if started.elapsed() >= deadline {
                        return Err(GatewayError::RequestTimeout(format!(
                            "{endpoint}: gate still held by another caller after {deadline:?}"
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn call_with_retry<F, Fut, T>(&self, endpoint: &str, make_call: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let backoff = &self.config.backoff;
        let mut attempt = 0u32;
        loop {
            let call = make_call();
            match tokio::time::timeout(self.config.upstream_timeout, call).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(GatewayError::Throttled(msg))) => {
                    self.gate.extend(endpoint, self.config.upstream_timeout).await;
                    if attempt >= 2 {
                        return Err(GatewayError::Throttled(msg));
                    }
                    #[cfg(feature = "tracing")]
                    debug!(attempt, %msg, "throttled by upstream, extended gate window and retrying");
                }
                Ok(Err(err)) if err.is_transient() && attempt < 2 => {
                    #[cfg(feature = "tracing")]
                    debug!(attempt, error = %err, "retrying transient upstream failure");
                }
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) if attempt < 2 => {
                    #[cfg(feature = "tracing")]
                    debug!(attempt, "retrying after upstream call timeout");
                }
                Err(_elapsed) => {
                    return Err(GatewayError::RequestTimeout("upstream call exceeded its deadline".into()))
                }
            }
            let delay = backoff.min_backoff_ms.saturating_mul(u64::from(attempt) + 1).min(backoff.max_backoff_ms);
            let jitter = if backoff.jitter_percent == 0 {
                0
            } else {
                rand::random_range(0..=(delay.saturating_mul(u64::from(backoff.jitter_percent)) / 100).max(1))
            };
            tokio::time::sleep(Duration::from_millis(delay + jitter)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vortex_middleware::EndpointGate;
    use vortex_types::{BackoffConfig, Exchange, GateConfig};

    fn batch_config() -> BatchConfig {
        BatchConfig {
            max_chunk: 2,
            coalesce_window: Duration::from_millis(20),
            upstream_timeout: Duration::from_millis(200),
            backoff: BackoffConfig { min_backoff_ms: 1, max_backoff_ms: 2, factor: 1, jitter_percent: 0 },
        }
    }

    struct CountingMock {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl UpstreamAdapter for CountingMock {
        fn name(&self) -> &'static str {
            "counting-mock"
        }
        async fn resolve_token(&self, _token: u32) -> Result<Option<Exchange>, GatewayError> {
            Ok(None)
        }
        async fn fetch_quotes(&self, pairs: &[Pair], _mode: Mode) -> Result<HashMap<Pair, Quote>, GatewayError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let now = chrono::Utc::now();
            Ok(pairs.iter().map(|&p| (p, Quote { last_price: Some(1.0), ohlc: None, volume: None, timestamp: now })).collect())
        }
        async fn fetch_history(&self, _pair: Pair, _req: HistoryRequest) -> Result<Vec<vortex_core::Candle>, GatewayError> {
            Ok(Vec::new())
        }
        async fn connect_ws(&self) -> Result<vortex_core::stream::StreamHandle, GatewayError> {
            unimplemented!()
        }
        fn decode_frame(&self, _frame: &[u8]) -> Option<vortex_core::TickRecord> {
            None
        }
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_into_one_upstream_call() {
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(CountingMock { calls: AtomicU32::new(0) });
        let gate = Arc::new(EndpointGate::local_only(GateConfig { interval: Duration::from_millis(1), jitter_ms: 0 }));
        let resolver = Arc::new(Resolver::new(
            crate::resolver::TieredCatalogue::new(Vec::new()),
            Duration::from_secs(60),
        ));
        let batcher = Batcher::new(adapter.clone(), gate, resolver, batch_config());

        let pair = Pair::new(Exchange::NseEq, 26000);
        let a = batcher.clone();
        let b = batcher.clone();
        let (ra, rb) = tokio::join!(
            a.quotes(&[pair], Mode::Ltp),
            b.quotes(&[pair], Mode::Ltp),
        );
        assert_eq!(ra.get(&pair).unwrap().last_price, Some(1.0));
        assert_eq!(rb.get(&pair).unwrap().last_price, Some(1.0));
    }

    #[tokio::test]
    async fn empty_pairs_short_circuits() {
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(CountingMock { calls: AtomicU32::new(0) });
        let gate = Arc::new(EndpointGate::local_only(GateConfig::default()));
        let resolver = Arc::new(Resolver::new(crate::resolver::TieredCatalogue::new(Vec::new()), Duration::from_secs(60)));
        let batcher = Batcher::new(adapter, gate, resolver, batch_config());
        let out = batcher.quotes(&[], Mode::Ltp).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn a_gate_deadline_exceeded_under_contention_skips_the_upstream_call() {
        let calls = Arc::new(AtomicU32::new(0));
        struct CallCountingMock {
            calls: Arc<AtomicU32>,
        }
        #[async_trait::async_trait]
        impl UpstreamAdapter for CallCountingMock {
            fn name(&self) -> &'static str {
                "call-counting-mock"
            }
            async fn resolve_token(&self, _token: u32) -> Result<Option<Exchange>, GatewayError> {
                Ok(None)
            }
            async fn fetch_quotes(&self, pairs: &[Pair], _mode: Mode) -> Result<HashMap<Pair, Quote>, GatewayError> {
                self.calls.fetch_add(1, Ordering::Relaxed);
                let now = chrono::Utc::now();
                Ok(pairs.iter().map(|&p| (p, Quote { last_price: Some(1.0), ohlc: None, volume: None, timestamp: now })).collect())
            }
            async fn fetch_history(&self, _pair: Pair, _req: HistoryRequest) -> Result<Vec<vortex_core::Candle>, GatewayError> {
                Ok(Vec::new())
            }
            async fn connect_ws(&self) -> Result<vortex_core::stream::StreamHandle, GatewayError> {
                unimplemented!()
            }
            fn decode_frame(&self, _frame: &[u8]) -> Option<vortex_core::TickRecord> {
                None
            }
        }

        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(CallCountingMock { calls: calls.clone() });
        let gate = Arc::new(EndpointGate::local_only(GateConfig { interval: Duration::from_secs(60), jitter_ms: 0 }));
        // Hold the "ltp" endpoint's window so the batcher's own acquisition
        // attempt is stuck at `AlreadyHeld` for the whole deadline.
        gate.acquire("ltp").await;
        let resolver = Arc::new(Resolver::new(crate::resolver::TieredCatalogue::new(Vec::new()), Duration::from_secs(60)));
        let mut config = batch_config();
        config.upstream_timeout = Duration::from_millis(30);
        let batcher = Batcher::new(adapter, gate, resolver, config);

        let pair = Pair::new(Exchange::NseEq, 26000);
        let out = batcher.quotes(&[pair], Mode::Ltp).await;

        assert_eq!(calls.load(Ordering::Relaxed), 0, "upstream must never be called once the gate's deadline is exceeded");
        assert_eq!(out.get(&pair).unwrap().last_price, None);
    }
}
