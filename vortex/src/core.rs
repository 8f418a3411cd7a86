//! The gateway core (C9 composer plus the wiring root): assembles the
//! resolver, batcher, cache, and subscription multiplexer into one
//! `Gateway`, and implements the staged-fallback LTP composer.
//!
//! One immutable, cheaply-cloneable core built once by a dedicated
//! builder, with a staged collect-then-degrade shape carried over into
//! `get_ltp`: try the primary path, then degrade through successive
//! fallback tiers, and only ever surface a final null once every tier has
//! been exhausted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use vortex_core::{Candle, GatewayError, HistoryRequest, Pair, Quote, TickRecord, UpstreamAdapter};
use vortex_middleware::{EndpointGate, LocalStore, QuoteCache, SharedStore};
use vortex_types::{GatewayConfig, Mode};
use vortex_upstream::ControlFrame;

use crate::batcher::Batcher;
use crate::multiplexer::Multiplexer;
use crate::resolver::{Resolver, TieredCatalogue, UpstreamCatalogue};
use crate::router::util::with_deadline;

/// A snapshot answer's key: either the bare token the caller asked about,
/// or the resolved pair, depending on which input shape the caller used
/// (`{instruments:[...]}` vs `{pairs:[...]}`, §6 of the external interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LtpKey {
    /// Keyed by the original bare token (client sent `{instruments:[...]}}`).
    Token(u32),
    /// Keyed by the resolved pair (client sent `{pairs:[...]}}`).
    Pair(Pair),
}

impl fmt::Display for LtpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(t) => write!(f, "{t}"),
            Self::Pair(p) => write!(f, "{}", p.wire()),
        }
    }
}

fn is_valid_price(quote: &Quote) -> bool {
    quote.last_price.is_some_and(|p| p > 0.0)
}

/// The assembled gateway: the single owner of the resolver, batcher, cache,
/// and subscription multiplexer, shared by `Arc` across every HTTP/WS
/// handler.
pub struct Gateway {
    resolver: Arc<Resolver>,
    batcher: Arc<Batcher>,
    cache: Arc<QuoteCache>,
    multiplexer: Arc<Multiplexer>,
    config: Arc<GatewayConfig>,
}

impl Gateway {
    /// The resolver (C1), shared with the gateway's subscribe path for
    /// resolving/priming bare tokens before entitlement filtering.
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// The subscription multiplexer (C7).
    #[must_use]
    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    /// The quote cache (C4).
    #[must_use]
    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    /// The assembled, immutable configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    /// `get_ltp` (C9): the staged-fallback LTP composer.
    ///
    /// 1. Resolve `tokens` via C1; unresolved tokens become a final null.
    /// 2. Batch-fetch every pair (explicit `pairs` plus resolved tokens) at
    ///    `Mode::Ltp` via C3.
    /// 3. For keys still missing a valid price, consult the quote cache
    ///    (C4 memory tier, then its shared-store tier).
    /// 4. For keys still missing, issue one targeted C3 re-probe.
    /// 5. If `ltp_only`, drop keys whose final price is still null/≤0.
    ///
    /// Never synthesizes a price and never reports a fabricated zero.
    pub async fn get_ltp(&self, tokens: &[u32], pairs: &[Pair], ltp_only: bool) -> HashMap<LtpKey, Quote> {
        with_deadline("get_ltp", self.config.snapshot_deadline, self.get_ltp_inner(tokens, pairs, ltp_only))
            .await
            .unwrap_or_default()
    }

    /// Warm the memory cache tier with every valid price a batcher fetch
    /// just produced, so an instrument that is only ever polled over REST
    /// (never ticks over WS) still hits the fast path on its next lookup.
    async fn cache_valid_prices(&self, quotes: &HashMap<Pair, Quote>) {
        for (&pair, quote) in quotes {
            if let Some(price) = quote.last_price.filter(|p| *p > 0.0) {
                self.cache.put(pair, price.to_string()).await;
            }
        }
    }

    async fn get_ltp_inner(&self, tokens: &[u32], pairs: &[Pair], ltp_only: bool) -> HashMap<LtpKey, Quote> {
        let now = chrono::Utc::now();
        let mut result: HashMap<LtpKey, Quote> = HashMap::new();

        let built = self.resolver.build_pairs(tokens).await;
        for &unresolved in &built.unresolved {
            result.insert(LtpKey::Token(unresolved), Quote::null(now));
        }

        let mut key_for_pair: HashMap<Pair, LtpKey> = HashMap::new();
        for &pair in pairs {
            key_for_pair.insert(pair, LtpKey::Pair(pair));
        }
        for pair in &built.pairs {
            key_for_pair.insert(*pair, LtpKey::Token(pair.token()));
        }
        let all_pairs: Vec<Pair> = key_for_pair.keys().copied().collect();

        let mut quotes = self.batcher.ltp_by_pairs(&all_pairs).await;
        self.cache_valid_prices(&quotes).await;

        let mut still_missing: Vec<Pair> = Vec::new();
        for &pair in &all_pairs {
            if quotes.get(&pair).is_some_and(is_valid_price) {
                continue;
            }
            if let Some(cached) = self.cache.get(pair).await {
                if let Ok(price) = cached.parse::<f64>() {
                    if price > 0.0 {
                        quotes.insert(pair, Quote { last_price: Some(price), ohlc: None, volume: None, timestamp: now });
                        continue;
                    }
                }
            }
            still_missing.push(pair);
        }

        if !still_missing.is_empty() {
            let reprobed = self.batcher.ltp_by_pairs(&still_missing).await;
            self.cache_valid_prices(&reprobed).await;
            for pair in still_missing {
                if let Some(q) = reprobed.get(&pair) {
                    quotes.insert(pair, q.clone());
                }
            }
        }

        for (pair, key) in key_for_pair {
            let quote = quotes.get(&pair).cloned().unwrap_or_else(|| Quote::null(now));
            result.insert(key, quote);
        }

        if ltp_only {
            result.retain(|_, quote| is_valid_price(quote));
        }
        result
    }

    /// General quote snapshot at an arbitrary mode (`/quotes`). At
    /// `Mode::Ltp` this is the full staged-fallback composer; at
    /// `Mode::Ohlcv`/`Mode::Full` the cache only ever holds a bare last
    /// price, so there is no OHLC-aware fallback tier to consult and this
    /// is a direct, single batcher call.
    pub async fn get_quotes(&self, tokens: &[u32], mode: Mode, ltp_only: bool) -> HashMap<LtpKey, Quote> {
        if mode == Mode::Ltp {
            return self.get_ltp(tokens, &[], ltp_only).await;
        }
        with_deadline("get_quotes", self.config.snapshot_deadline, self.get_quotes_inner(tokens, mode, ltp_only))
            .await
            .unwrap_or_default()
    }

    async fn get_quotes_inner(&self, tokens: &[u32], mode: Mode, ltp_only: bool) -> HashMap<LtpKey, Quote> {
        let now = chrono::Utc::now();
        let built = self.resolver.build_pairs(tokens).await;
        let mut result: HashMap<LtpKey, Quote> = HashMap::new();
        for &unresolved in &built.unresolved {
            result.insert(LtpKey::Token(unresolved), Quote::null(now));
        }
        let quotes = self.batcher.quotes(&built.pairs, mode).await;
        for pair in built.pairs {
            let quote = quotes.get(&pair).cloned().unwrap_or_else(|| Quote::null(now));
            result.insert(LtpKey::Token(pair.token()), quote);
        }
        if ltp_only {
            result.retain(|_, quote| is_valid_price(quote));
        }
        result
    }

    /// Historical candles for a single already-resolved pair (`/historical/:token`).
    ///
    /// # Errors
    /// Propagates the batcher's upstream error, or `GatewayError::RequestTimeout`
    /// if the overall snapshot deadline elapses first.
    pub async fn get_history(&self, pair: Pair, req: HistoryRequest) -> Result<Vec<Candle>, GatewayError> {
        with_deadline("get_history", self.config.snapshot_deadline, self.batcher.history(pair, req)).await?
    }

    /// Write a decoded tick through the cache (C4) and fan it out to every
    /// subscribed connection (C7), the integration point between the tick
    /// ingestor (owned by the concrete adapter, outside this crate's
    /// gateway abstraction) and the rest of the gateway.
    pub async fn ingest_tick(&self, tick: TickRecord) {
        if let Some(pair) = self.multiplexer.pair_for_token(tick.token()).await {
            self.cache.put_tick(pair, tick.last_price().to_string()).await;
        }
        self.multiplexer.dispatch(tick).await;
    }
}

/// Builds a `Gateway` from its upstream adapter and assembled
/// configuration, wiring the resolver/batcher/cache/multiplexer the same
/// way every time (mirroring `BorsaBuilder`'s role: the only place these
/// collaborators are constructed and connected).
pub struct GatewayBuilder {
    adapter: Arc<dyn UpstreamAdapter>,
    config: GatewayConfig,
    shared_store: Option<Arc<dyn SharedStore>>,
    control_tx: Option<tokio::sync::mpsc::Sender<ControlFrame>>,
}

impl GatewayBuilder {
    /// Start building a gateway around its single upstream adapter and
    /// assembled configuration.
    #[must_use]
    pub fn new(adapter: Arc<dyn UpstreamAdapter>, config: GatewayConfig) -> Self {
        Self { adapter, config, shared_store: None, control_tx: None }
    }

    /// Use a specific coordination store (e.g. `RedisStore`) instead of the
    /// default local-only degrade mode.
    #[must_use]
    pub fn with_shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared_store = Some(store);
        self
    }

    /// Wire the multiplexer's outbound control-frame channel to a live
    /// tick ingestor's sender (`VortexAdapter::control_sender`). Omitted in
    /// tests: frames are then sent into a sink channel whose receiver is
    /// drained and discarded.
    #[must_use]
    pub fn with_control_sender(mut self, tx: tokio::sync::mpsc::Sender<ControlFrame>) -> Self {
        self.control_tx = Some(tx);
        self
    }

    /// Assemble the gateway.
    #[must_use]
    pub fn build(self) -> Arc<Gateway> {
        let shared_store = self.shared_store.unwrap_or_else(|| Arc::new(LocalStore::new()) as Arc<dyn SharedStore>);

        let gate = Arc::new(EndpointGate::new(shared_store.clone(), self.config.gate));
        let cache = Arc::new(QuoteCache::new(&self.config.cache, shared_store));

        let catalogue = TieredCatalogue::new(vec![Arc::new(UpstreamCatalogue::new(self.adapter.clone()))]);
        let resolver = Arc::new(Resolver::new(catalogue, self.config.cache.resolver_ttl));

        let batcher = Batcher::new(self.adapter.clone(), gate, resolver.clone(), self.config.batch.clone());

        let control_tx = self.control_tx.unwrap_or_else(|| {
            let (tx, mut rx) = tokio::sync::mpsc::channel(16);
            tokio::spawn(async move { while rx.recv().await.is_some() {} });
            tx
        });
        let multiplexer = Arc::new(Multiplexer::new(control_tx, self.config.ws.max_subs));

        Arc::new(Gateway {
            resolver,
            batcher,
            cache,
            multiplexer,
            config: Arc::new(self.config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vortex_mock::MockUpstreamAdapter;
    use vortex_types::Exchange;

    fn gateway() -> Arc<Gateway> {
        let adapter: Arc<dyn UpstreamAdapter> = Arc::new(MockUpstreamAdapter::new());
        GatewayBuilder::new(adapter, GatewayConfig::default()).build()
    }

    #[tokio::test]
    async fn get_ltp_by_token_resolves_and_prices() {
        let gw = gateway();
        let out = gw.get_ltp(&[26000], &[], false).await;
        assert_eq!(out.get(&LtpKey::Token(26000)).unwrap().last_price, Some(540.10));
    }

    #[tokio::test]
    async fn get_ltp_unresolved_token_is_null_and_never_fabricated() {
        let gw = gateway();
        let out = gw.get_ltp(&[1], &[], false).await;
        assert_eq!(out.get(&LtpKey::Token(1)).unwrap().last_price, None);
    }

    #[tokio::test]
    async fn ltp_only_drops_null_entries() {
        let gw = gateway();
        let out = gw.get_ltp(&[26000, 1], &[], true).await;
        assert!(out.contains_key(&LtpKey::Token(26000)));
        assert!(!out.contains_key(&LtpKey::Token(1)));
    }

    #[tokio::test]
    async fn get_ltp_by_pair_keys_output_by_the_pair_itself() {
        let gw = gateway();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let out = gw.get_ltp(&[], &[pair], false).await;
        assert_eq!(out.get(&LtpKey::Pair(pair)).unwrap().last_price, Some(540.10));
    }

    #[tokio::test]
    async fn get_quotes_at_non_ltp_mode_still_resolves_bare_tokens() {
        let gw = gateway();
        let out = gw.get_quotes(&[26000], Mode::Ohlcv, false).await;
        assert_eq!(out.get(&LtpKey::Token(26000)).unwrap().last_price, Some(540.10));
    }

    #[tokio::test]
    async fn get_history_delegates_to_the_batcher() {
        let gw = gateway();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let req = HistoryRequest { from: 0, to: 1, resolution: "day" };
        let candles = gw.get_history(pair, req).await.unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[tokio::test]
    async fn get_ltp_warms_the_cache_on_a_successful_provider_response() {
        let gw = gateway();
        let pair = Pair::new(Exchange::NseEq, 26000);
        assert_eq!(gw.cache.get(pair).await, None, "nothing ticked yet, so the cache starts empty");
        gw.get_ltp(&[26000], &[], false).await;
        assert_eq!(gw.cache.get(pair).await.as_deref(), Some("540.1"));
    }

    #[tokio::test]
    async fn ingest_tick_writes_cache_only_for_a_registered_pair() {
        let gw = gateway();
        let pair = Pair::new(Exchange::NseEq, 26000);
        let client = gw.multiplexer.new_client();
        gw.multiplexer.register(client, pair, Mode::Ltp).await.unwrap();

        gw.ingest_tick(TickRecord::Ltp { token: 26000, last_price: 777.0, exchange_timestamp: 0 }).await;
        assert_eq!(gw.cache.get(pair).await.as_deref(), Some("777"));
    }
}
