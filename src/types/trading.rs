use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Symbols with first-class exchange reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradingPair {
    BTCUSDT,
    ETHUSDT,
    SOLUSDT,
    BNBUSDT,
    ADAUSDT,
    XRPUSDT,
}

impl TradingPair {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingPair::BTCUSDT => "BTCUSDT",
            TradingPair::ETHUSDT => "ETHUSDT",
            TradingPair::SOLUSDT => "SOLUSDT",
            TradingPair::BNBUSDT => "BNBUSDT",
            TradingPair::ADAUSDT => "ADAUSDT",
            TradingPair::XRPUSDT => "XRPUSDT",
        }
    }

    /// Number of decimals in the exchange price filter.
    pub fn price_precision(&self) -> u32 {
        match self {
            TradingPair::BTCUSDT => 2,
            TradingPair::ETHUSDT => 2,
            TradingPair::SOLUSDT => 2,
            TradingPair::BNBUSDT => 1,
            TradingPair::ADAUSDT => 4,
            TradingPair::XRPUSDT => 4,
        }
    }

    /// Number of decimals in the exchange lot-size filter.
    pub fn quantity_precision(&self) -> u32 {
        match self {
            TradingPair::BTCUSDT => 5,
            TradingPair::ETHUSDT => 4,
            TradingPair::SOLUSDT => 2,
            TradingPair::BNBUSDT => 3,
            TradingPair::ADAUSDT => 1,
            TradingPair::XRPUSDT => 1,
        }
    }

    pub fn max_leverage(&self) -> u32 {
        match self {
            TradingPair::BTCUSDT => 125,
            TradingPair::ETHUSDT => 100,
            TradingPair::SOLUSDT | TradingPair::BNBUSDT => 75,
            TradingPair::ADAUSDT | TradingPair::XRPUSDT => 50,
        }
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTCUSDT" => Ok(TradingPair::BTCUSDT),
            "ETHUSDT" => Ok(TradingPair::ETHUSDT),
            "SOLUSDT" => Ok(TradingPair::SOLUSDT),
            "BNBUSDT" => Ok(TradingPair::BNBUSDT),
            "ADAUSDT" => Ok(TradingPair::ADAUSDT),
            "XRPUSDT" => Ok(TradingPair::XRPUSDT),
            other => Err(format!("unknown trading pair: {}", other)),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Long position / buy order
    Buy,
    /// Short position / sell order
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction emitted by a strategy for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Neutral,
}

impl Signal {
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
            Signal::Neutral => None,
        }
    }

    pub fn from_side(side: Side) -> Self {
        match side {
            Side::Buy => Signal::Buy,
            Side::Sell => Signal::Sell,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Neutral => write!(f, "NONE"),
        }
    }
}

/// Where the simulated market order fills within a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillTiming {
    Open,
    #[default]
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    /// Cash product: the full notional is locked and shorting is unavailable.
    #[default]
    Spot,
    /// Leveraged product: notional / leverage is locked as margin.
    Perpetual,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Spot => write!(f, "spot"),
            MarketType::Perpetual => write!(f, "perpetual"),
        }
    }
}

/// Which side of the book pays for a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Maker,
    #[default]
    Taker,
}
