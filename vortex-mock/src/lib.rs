//! vortex-mock
//!
//! An in-memory `UpstreamAdapter` used by `vortex-middleware`'s and
//! `vortex`'s test suites so integration tests never touch the network: a
//! small struct with deterministic fixture data and magic sentinel tokens
//! that force specific failure modes for error-path tests.
#![warn(missing_docs)]

use std::collections::HashMap;

use async_trait::async_trait;

use vortex_core::stream::StreamHandle;
use vortex_core::{Candle, GatewayError, HistoryRequest, Ohlc, Pair, Quote, TickRecord, UpstreamAdapter};
use vortex_types::{Exchange, Mode};

/// Token value that forces `fetch_quotes`/`fetch_history` to return an
/// `UpstreamTransient` error, for exercising batcher retry paths.
pub const TOKEN_TRANSIENT_FAILURE: u32 = 999_001;
/// Token value with no catalogue entry: `resolve_token` returns `Ok(None)`.
pub const TOKEN_UNRESOLVED: u32 = 999_002;

/// Deterministic in-memory upstream adapter.
///
/// Holds a fixed catalogue (`token -> exchange`) and a fixed quote fixture
/// (`token -> last_price`) seeded at construction; `fetch_quotes` looks up
/// each requested pair's token in the fixture, omitting the key entirely
/// when absent (never fabricating a zero), matching the real upstream
/// client's contract.
pub struct MockUpstreamAdapter {
    catalogue: HashMap<u32, Exchange>,
    quotes: HashMap<u32, f64>,
}

impl Default for MockUpstreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstreamAdapter {
    /// Build an adapter seeded with a small deterministic fixture: NSE
    /// equity token 26000 at 540.10, NSE F&O token 135938 at 17624.05.
    #[must_use]
    pub fn new() -> Self {
        let mut catalogue = HashMap::new();
        catalogue.insert(26000, Exchange::NseEq);
        catalogue.insert(135_938, Exchange::NseFo);

        let mut quotes = HashMap::new();
        quotes.insert(26000, 540.10);
        quotes.insert(135_938, 17624.05);

        Self { catalogue, quotes }
    }

    /// Register (or override) a catalogue entry for a token.
    pub fn with_pair(mut self, token: u32, exchange: Exchange) -> Self {
        self.catalogue.insert(token, exchange);
        self
    }

    /// Register (or override) a fixture quote for a token.
    #[must_use]
    pub fn with_quote(mut self, token: u32, last_price: f64) -> Self {
        self.quotes.insert(token, last_price);
        self
    }

}

#[async_trait]
impl UpstreamAdapter for MockUpstreamAdapter {
    fn name(&self) -> &'static str {
        "vortex-mock"
    }

    async fn resolve_token(&self, token: u32) -> Result<Option<Exchange>, GatewayError> {
        if token == TOKEN_TRANSIENT_FAILURE {
            return Err(GatewayError::UpstreamTransient("mock transient".into()));
        }
        Ok(self.catalogue.get(&token).copied())
    }

    async fn fetch_quotes(
        &self,
        pairs: &[Pair],
        _mode: Mode,
    ) -> Result<HashMap<Pair, Quote>, GatewayError> {
        if pairs.iter().any(|p| p.token() == TOKEN_TRANSIENT_FAILURE) {
            return Err(GatewayError::UpstreamTransient("mock transient".into()));
        }
        let now = chrono::Utc::now();
        let mut out = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(&last_price) = self.quotes.get(&pair.token()) {
                out.insert(
                    *pair,
                    Quote {
                        last_price: Some(last_price),
                        ohlc: None,
                        volume: None,
                        timestamp: now,
                    },
                );
            }
        }
        Ok(out)
    }

    async fn fetch_history(
        &self,
        pair: Pair,
        req: HistoryRequest,
    ) -> Result<Vec<Candle>, GatewayError> {
        if pair.token() == TOKEN_TRANSIENT_FAILURE {
            return Err(GatewayError::UpstreamTransient("mock transient".into()));
        }
        let base = self.quotes.get(&pair.token()).copied().unwrap_or(100.0);
        Ok(vec![Candle {
            timestamp: chrono::DateTime::from_timestamp(req.from, 0).unwrap_or(chrono::Utc::now()),
            ohlc: Ohlc {
                open: base,
                high: base * 1.01,
                low: base * 0.99,
                close: base,
            },
            volume: 1000,
        }])
    }

    async fn connect_ws(&self) -> Result<StreamHandle, GatewayError> {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let join = tokio::spawn(async move {
            let _ = stop_rx.await;
        });
        Ok(StreamHandle::new(join, stop_tx))
    }

    fn decode_frame(&self, _frame: &[u8]) -> Option<TickRecord> {
        // Tests exercising frame decoding drive `vortex_upstream::ws::decode_frame`
        // directly; this adapter has no wire format of its own to decode.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_seeded_tokens() {
        let adapter = MockUpstreamAdapter::new();
        assert_eq!(adapter.resolve_token(26000).await.unwrap(), Some(Exchange::NseEq));
        assert_eq!(adapter.resolve_token(TOKEN_UNRESOLVED).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fetch_quotes_omits_unknown_tokens_never_fabricates_zero() {
        let adapter = MockUpstreamAdapter::new();
        let pairs = [Pair::new(Exchange::NseEq, 26000), Pair::new(Exchange::NseEq, 1)];
        let out = adapter.fetch_quotes(&pairs, Mode::Ltp).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[&pairs[0]].last_price, Some(540.10));
    }

    #[tokio::test]
    async fn transient_token_forces_error() {
        let adapter = MockUpstreamAdapter::new();
        let pairs = [Pair::new(Exchange::NseEq, TOKEN_TRANSIENT_FAILURE)];
        let err = adapter.fetch_quotes(&pairs, Mode::Ltp).await.unwrap_err();
        assert!(err.is_transient());
    }
}
