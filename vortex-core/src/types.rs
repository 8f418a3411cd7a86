//! Core domain types shared by every crate in the workspace: the resolved
//! `Pair`, quote/candle shapes, the binary tick record, and per-connection
//! tenant context.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vortex_types::Exchange;

pub use vortex_types::{
    BackoffConfig, BatchConfig, CacheConfig, GateConfig, GatewayConfig, GatewayError, WsConfig,
};

/// An `(exchange, token)` tuple — the only form accepted by the upstream.
///
/// `Pair` can only be constructed by the resolver (`build_pairs`/`prime`),
/// so no pair reaches the upstream HTTP client or WS ingestor without
/// having first passed through exchange resolution. The private field
/// enforces this: call sites outside `vortex::resolver` can read a `Pair`'s
/// fields but cannot manufacture one directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    exchange: Exchange,
    token: u32,
}

impl Pair {
    /// Construct a pair. Restricted to the resolver module by convention;
    /// kept `pub(crate)`-free so the resolver crate (`vortex`) can build
    /// them, while downstream consumers only ever receive already-built
    /// pairs back out of resolver calls.
    #[must_use]
    pub const fn new(exchange: Exchange, token: u32) -> Self {
        Self { exchange, token }
    }

    /// Exchange this pair is listed on.
    #[must_use]
    pub const fn exchange(&self) -> Exchange {
        self.exchange
    }

    /// Upstream numeric instrument token.
    #[must_use]
    pub const fn token(&self) -> u32 {
        self.token
    }

    /// Render the upstream wire form, e.g. `"NSE_EQ-22"`.
    #[must_use]
    pub fn wire(&self) -> String {
        format!("{}-{}", self.exchange, self.token)
    }

    /// Parse a `"EXCHANGE-TOKEN"` wire string into a `Pair`.
    pub fn parse_wire(s: &str) -> Result<Self, GatewayError> {
        let (ex, tok) = s
            .split_once('-')
            .ok_or_else(|| GatewayError::InvalidPayload(format!("malformed pair: {s}")))?;
        let exchange: Exchange = ex
            .parse()
            .map_err(|_| GatewayError::InvalidPayload(format!("unknown exchange: {ex}")))?;
        let token: u32 = tok
            .parse()
            .map_err(|_| GatewayError::InvalidPayload(format!("malformed token: {tok}")))?;
        Ok(Self::new(exchange, token))
    }
}

/// Open/high/low/close candle fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    /// Opening price for the session.
    pub open: f64,
    /// Highest traded price for the session.
    pub high: f64,
    /// Lowest traded price for the session.
    pub low: f64,
    /// Closing (or latest) traded price for the session.
    pub close: f64,
}

/// A composed quote answer for a single pair, as produced by the LTP
/// composer (C9). `last_price` is `None` rather than a fabricated zero
/// whenever no layer in the fallback chain produced a finite positive
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Last traded price, or `None` if unavailable from every layer.
    pub last_price: Option<f64>,
    /// OHLC fields, present when `mode` requested at least `Ohlcv`.
    pub ohlc: Option<Ohlc>,
    /// Traded volume, present when `mode` requested at least `Ohlcv`.
    pub volume: Option<u64>,
    /// Timestamp this quote was composed at.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// An empty quote carrying only a timestamp — used when every layer of
    /// the fallback chain failed to produce data for a key.
    #[must_use]
    pub fn null(timestamp: DateTime<Utc>) -> Self {
        Self {
            last_price: None,
            ohlc: None,
            volume: None,
            timestamp,
        }
    }
}

/// A single OHLCV candle in a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// OHLC fields for the candle.
    pub ohlc: Ohlc,
    /// Traded volume during the candle.
    pub volume: u64,
}

/// A decoded binary tick record off the upstream WebSocket feed.
///
/// `decode` dispatches purely on the frame's byte length (22/62/266), never
/// on an embedded type byte — this is an explicit, reviewed decision (see
/// `DESIGN.md`, Open Question (a)).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TickRecord {
    /// 22-byte record: token, last traded price, and exchange timestamp.
    Ltp {
        /// Instrument token the tick belongs to.
        token: u32,
        /// Last traded price (paise/ticks as upstream, converted to rupees).
        last_price: f64,
        /// Exchange-side timestamp (unix seconds).
        exchange_timestamp: i64,
    },
    /// 62-byte record: LTP plus OHLC and cumulative volume.
    Ohlcv {
        /// Instrument token the tick belongs to.
        token: u32,
        /// Last traded price.
        last_price: f64,
        /// Cumulative traded volume for the session.
        volume: u64,
        /// Session OHLC.
        ohlc: Ohlc,
        /// Exchange-side timestamp (unix seconds).
        exchange_timestamp: i64,
    },
    /// 266-byte record: full depth in addition to the OHLCV fields.
    Full {
        /// Instrument token the tick belongs to.
        token: u32,
        /// Last traded price.
        last_price: f64,
        /// Cumulative traded volume for the session.
        volume: u64,
        /// Session OHLC.
        ohlc: Ohlc,
        /// Exchange-side timestamp (unix seconds).
        exchange_timestamp: i64,
        /// Best five bid prices (depth), nearest first.
        bid_prices: [f64; 5],
        /// Best five ask prices (depth), nearest first.
        ask_prices: [f64; 5],
    },
}

impl TickRecord {
    /// Instrument token carried by every variant.
    #[must_use]
    pub const fn token(&self) -> u32 {
        match self {
            Self::Ltp { token, .. } | Self::Ohlcv { token, .. } | Self::Full { token, .. } => {
                *token
            }
        }
    }

    /// Last traded price carried by every variant.
    #[must_use]
    pub const fn last_price(&self) -> f64 {
        match self {
            Self::Ltp { last_price, .. }
            | Self::Ohlcv { last_price, .. }
            | Self::Full { last_price, .. } => *last_price,
        }
    }
}

/// Per-connection context resolved from a client's API key at accept time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    /// Raw API key presented by the client.
    pub api_key: String,
    /// Stable tenant identifier.
    pub tenant_id: String,
    /// Requests-per-minute budget on the tenant's snapshot endpoints.
    pub rate_limit_per_minute: u32,
    /// Maximum number of concurrent connections this tenant may hold.
    pub connection_limit: u32,
    /// Exchanges the tenant is entitled to subscribe to.
    pub entitlements: HashSet<Exchange>,
    /// Per-event-name RPS overrides for this tenant (falls back to
    /// `WsConfig::per_event_rps` when absent).
    pub ws_rps_overrides: HashMap<String, u32>,
}

impl TenantContext {
    /// Returns true if the tenant is entitled to subscribe on `exchange`.
    #[must_use]
    pub fn is_entitled(&self, exchange: Exchange) -> bool {
        self.entitlements.contains(&exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_wire_round_trips() {
        let p = Pair::new(Exchange::NseEq, 22);
        assert_eq!(p.wire(), "NSE_EQ-22");
        assert_eq!(Pair::parse_wire("NSE_EQ-22").unwrap(), p);
    }

    #[test]
    fn parse_wire_rejects_malformed() {
        assert!(Pair::parse_wire("NSE_EQ22").is_err());
        assert!(Pair::parse_wire("NSE_EQ-abc").is_err());
        assert!(Pair::parse_wire("XYZ-22").is_err());
    }

    #[test]
    fn tick_record_exposes_token_and_price_uniformly() {
        let t = TickRecord::Ltp {
            token: 26000,
            last_price: 540.1,
            exchange_timestamp: 0,
        };
        assert_eq!(t.token(), 26000);
        assert!((t.last_price() - 540.1).abs() < f64::EPSILON);
    }
}
