//! Upstream HTTP client (C5): a thin typed wrapper around the upstream's
//! `/data/quotes` and `/data/history` endpoints — a struct holding a
//! `reqwest::Client` plus static credentials, with one method per upstream
//! endpoint and a `classify_error` helper mapping transport/status failures
//! onto the gateway's error taxonomy.

use std::collections::HashMap;
use std::time::Duration;

use vortex_core::{GatewayError, HistoryRequest, Ohlc, Pair, Quote};
use vortex_types::{Exchange, Mode};

#[cfg_attr(feature = "tracing", tracing::instrument(skip(client)))]
fn classify_error(client: &str, status: Option<reqwest::StatusCode>, msg: &str) -> GatewayError {
    match status.map(reqwest::StatusCode::as_u16) {
        Some(401 | 403) => GatewayError::UpstreamAuthExpired,
        Some(429) => GatewayError::Throttled(format!("{client}: throttled (429)")),
        Some(s) if (500..600).contains(&s) => {
            GatewayError::UpstreamTransient(format!("{client}: server error {s}"))
        }
        Some(s) => GatewayError::UpstreamMalformed(format!("{client}: unexpected status {s}")),
        None => GatewayError::UpstreamTransient(format!("{client}: {msg}")),
    }
}

#[derive(serde::Deserialize)]
struct RawQuote {
    last_trade_price: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<u64>,
}

impl RawQuote {
    /// Absent or non-positive prices surface as `None`, never as `0`, per
    /// the upstream client's documented contract.
    fn into_quote(self, timestamp: chrono::DateTime<chrono::Utc>) -> Quote {
        let last_price = self.last_trade_price.filter(|p| *p > 0.0);
        let ohlc = match (self.open, self.high, self.low, self.close) {
            (Some(open), Some(high), Some(low), Some(close)) => {
                Some(Ohlc { open, high, low, close })
            }
            _ => None,
        };
        Quote {
            last_price,
            ohlc,
            volume: self.volume,
            timestamp,
        }
    }
}

#[derive(serde::Deserialize)]
struct RawCandle {
    #[serde(rename = "t")]
    timestamp: i64,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: u64,
}

/// Typed client for the upstream's rate-limited REST surface.
///
/// Holds a `reqwest::Client`, the base URL, and the static credentials
/// injected into every request: `x-api-key` and `Authorization: Bearer
/// <access_token>`.
#[derive(Debug, Clone)]
pub struct UpstreamHttpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth_token: String,
    timeout: Duration,
}

impl UpstreamHttpClient {
    /// Build a client from a freshly-constructed `reqwest::Client`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, auth_token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            auth_token: auth_token.into(),
            timeout,
        }
    }

    /// Build a client around a caller-provided `reqwest::Client` (e.g. one
    /// configured with a connection pool shared across the process).
    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            auth_token: auth_token.into(),
            timeout,
        }
    }

    fn mode_str(mode: Mode) -> &'static str {
        match mode {
            Mode::Ltp => "ltp",
            Mode::Ohlcv => "ohlc",
            Mode::Full => "full",
        }
    }

    /// `GET /data/quotes?q=EX-TOK[&q=...]&mode=ltp|ohlc|full`.
    ///
    /// # Errors
    /// Returns `UpstreamAuthExpired`, `UpstreamTransient`, or
    /// `UpstreamMalformed` per the upstream client's classification
    /// contract; never panics on a missing/zero price field.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, pairs)))]
    pub async fn quotes(
        &self,
        pairs: &[Pair],
        mode: Mode,
    ) -> Result<HashMap<Pair, Quote>, GatewayError> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let wire: Vec<String> = pairs.iter().map(Pair::wire).collect();
        let url = format!("{}/data/quotes", self.base_url);
        let query: Vec<(&str, &str)> = wire
            .iter()
            .map(|w| ("q", w.as_str()))
            .chain(std::iter::once(("mode", Self::mode_str(mode))))
            .collect();

        let resp = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_error("quotes", e.status(), &e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error("quotes", Some(status), &body));
        }

        let body: HashMap<String, RawQuote> = resp
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamMalformed(format!("quotes: {e}")))?;

        let now = chrono::Utc::now();
        let mut out = HashMap::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(raw) = body.into_iter().find(|(k, _)| k == &pair.wire()).map(|(_, v)| v) {
                out.insert(*pair, raw.into_quote(now));
            }
        }
        Ok(out)
    }

    /// `GET /data/history?exchange=EX&token=N&from=UNIX&to=UNIX&resolution=R`.
    ///
    /// # Errors
    /// Same classification contract as [`quotes`](Self::quotes).
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn history(
        &self,
        pair: Pair,
        req: HistoryRequest,
    ) -> Result<Vec<vortex_core::Candle>, GatewayError> {
        let url = format!("{}/data/history", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .query(&[
                ("exchange", pair.exchange().as_str().to_string()),
                ("token", pair.token().to_string()),
                ("from", req.from.to_string()),
                ("to", req.to.to_string()),
                ("resolution", req.resolution.to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_error("history", e.status(), &e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error("history", Some(status), &body));
        }

        let candles: Vec<RawCandle> = resp
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamMalformed(format!("history: {e}")))?;

        Ok(candles
            .into_iter()
            .map(|c| vortex_core::Candle {
                timestamp: chrono::DateTime::from_timestamp(c.timestamp, 0)
                    .unwrap_or_else(chrono::Utc::now),
                ohlc: Ohlc {
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                },
                volume: c.volume,
            })
            .collect())
    }

    /// Look up a token's exchange via the upstream's own instrument search
    /// endpoint, used as a last-resort catalogue tier by the resolver (C1)
    /// when the local catalogue tiers miss. Upstream lookups for an
    /// unlisted token return `Ok(None)`, not an error.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn resolve_token(&self, token: u32) -> Result<Option<Exchange>, GatewayError> {
        let url = format!("{}/data/instrument/{token}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_error("resolve_token", e.status(), &e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error("resolve_token", Some(status), &body));
        }

        #[derive(serde::Deserialize)]
        struct RawInstrument {
            exchange: String,
        }
        let raw: RawInstrument = resp
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamMalformed(format!("resolve_token: {e}")))?;
        Ok(raw.exchange.parse::<Exchange>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vortex_types::Exchange;

    #[test]
    fn raw_quote_nulls_non_positive_prices() {
        let raw = RawQuote {
            last_trade_price: Some(0.0),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        };
        let q = raw.into_quote(chrono::Utc::now());
        assert_eq!(q.last_price, None);
    }

    #[test]
    fn raw_quote_keeps_positive_price() {
        let raw = RawQuote {
            last_trade_price: Some(540.1),
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close: Some(1.5),
            volume: Some(100),
        };
        let q = raw.into_quote(chrono::Utc::now());
        assert_eq!(q.last_price, Some(540.1));
        assert!(q.ohlc.is_some());
    }

    #[tokio::test]
    async fn quotes_skips_pairs_missing_from_response_body() {
        let server = httpmock::MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/data/quotes");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "NSE_EQ-22": {"last_trade_price": 540.1}
                }));
        });

        let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
        let pairs = [Pair::new(Exchange::NseEq, 22), Pair::new(Exchange::NseFo, 135_938)];
        let out = client.quotes(&pairs, Mode::Ltp).await.unwrap();

        mock.assert();
        assert_eq!(out.len(), 1);
        assert_eq!(out[&pairs[0]].last_price, Some(540.1));
    }

    #[tokio::test]
    async fn quotes_classifies_401_as_auth_expired() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/data/quotes");
            then.status(401);
        });

        let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
        let pairs = [Pair::new(Exchange::NseEq, 22)];
        let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
        assert_eq!(err, GatewayError::UpstreamAuthExpired);
    }

    #[tokio::test]
    async fn quotes_classifies_429_as_throttled() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/data/quotes");
            then.status(429);
        });

        let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
        let pairs = [Pair::new(Exchange::NseEq, 22)];
        let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
        assert!(matches!(err, GatewayError::Throttled(_)), "429 must classify distinctly from a bare transient failure");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn quotes_classifies_500_as_transient() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/data/quotes");
            then.status(500);
        });

        let client = UpstreamHttpClient::new(server.base_url(), "key", "token", Duration::from_secs(1));
        let pairs = [Pair::new(Exchange::NseEq, 22)];
        let err = client.quotes(&pairs, Mode::Ltp).await.unwrap_err();
        assert!(err.is_transient());
    }
}
