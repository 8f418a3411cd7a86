use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Market segment a token is listed on.
///
/// `Pair`'s wire form is `"EXCHANGE-TOKEN"`; `Exchange`'s `Display`/`FromStr`
/// round-trip the `EXCHANGE` half of that string exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Exchange {
    /// NSE cash/equity segment.
    NseEq,
    /// NSE futures & options segment.
    NseFo,
    /// NSE currency derivatives segment.
    NseCur,
    /// MCX futures & options segment.
    McxFo,
}

impl Exchange {
    /// Stable wire identifier used in pair strings, cache keys, and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NseEq => "NSE_EQ",
            Self::NseFo => "NSE_FO",
            Self::NseCur => "NSE_CUR",
            Self::McxFo => "MCX_FO",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not match a known exchange identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NSE_EQ" => Ok(Self::NseEq),
            "NSE_FO" => Ok(Self::NseFo),
            "NSE_CUR" => Ok(Self::NseCur),
            "MCX_FO" => Ok(Self::McxFo),
            other => Err(UnknownExchange(other.to_string())),
        }
    }
}

/// Subscription depth requested for a `Pair` on the upstream tick feed.
///
/// Ordered so that the "effective upstream mode is the strongest mode any
/// client has asked for" rule from the subscription multiplexer can be
/// expressed as `Mode::max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    /// Last traded price only (22-byte tick record).
    Ltp,
    /// Last traded price plus OHLC and volume (62-byte tick record).
    Ohlcv,
    /// Full depth, OHLC, volume, and market depth (266-byte tick record).
    Full,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ltp => "ltp",
            Self::Ohlcv => "ohlcv",
            Self::Full => "full",
        };
        f.write_str(s)
    }
}

/// Error returned when a string does not match a known mode identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ltp" => Ok(Self::Ltp),
            "ohlcv" | "ohlc" => Ok(Self::Ohlcv),
            "full" => Ok(Self::Full),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_round_trips_through_wire_form() {
        for ex in [Exchange::NseEq, Exchange::NseFo, Exchange::NseCur, Exchange::McxFo] {
            let s = ex.to_string();
            assert_eq!(s.parse::<Exchange>().unwrap(), ex);
        }
    }

    #[test]
    fn unknown_exchange_is_rejected() {
        assert!("BSE".parse::<Exchange>().is_err());
    }

    #[test]
    fn mode_max_picks_strongest() {
        assert_eq!(Mode::Ltp.max(Mode::Full), Mode::Full);
        assert_eq!(Mode::Ohlcv.max(Mode::Ltp), Mode::Ohlcv);
        assert_eq!(Mode::Full.max(Mode::Full), Mode::Full);
    }

    #[test]
    fn mode_round_trips_through_display_and_from_str() {
        for mode in [Mode::Ltp, Mode::Ohlcv, Mode::Full] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert!("bogus".parse::<Mode>().is_err());
    }
}
