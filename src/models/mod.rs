use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV bar as served by the upstream source
///
/// `start_time` is the bar open in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub start_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
}

impl Candle {
    /// Bar open as a UTC timestamp
    pub fn start_datetime(&self) -> DateTime<Utc> {
        millis_to_datetime(self.start_time)
    }
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for Buy, -1 for Sell
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" | "buy" | "BUY" => Ok(Side::Buy),
            "Sell" | "sell" | "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// An executed simulated order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub execution_time: DateTime<Utc>,
}

impl Order {
    /// Quantity with the side's sign applied (Buy positive)
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }
}

/// Why an order entered the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Manual,
    TakeProfit,
    StopLoss,
}

/// Position state derived from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    New,
    Open(Side),
    Closed,
}

impl PositionState {
    pub fn is_open(&self) -> bool {
        matches!(self, PositionState::Open(_))
    }

    pub fn is_long(&self) -> bool {
        matches!(self, PositionState::Open(Side::Buy))
    }

    pub fn is_short(&self) -> bool {
        matches!(self, PositionState::Open(Side::Sell))
    }
}

/// Take-profit / stop-loss prices; zero means unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

impl Thresholds {
    pub fn new(take_profit: Decimal, stop_loss: Decimal) -> Self {
        Self {
            take_profit,
            stop_loss,
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.take_profit.is_zero() || !self.stop_loss.is_zero()
    }

    pub fn take_profit(&self) -> Option<Decimal> {
        (!self.take_profit.is_zero()).then_some(self.take_profit)
    }

    pub fn stop_loss(&self) -> Option<Decimal> {
        (!self.stop_loss.is_zero()).then_some(self.stop_loss)
    }
}

/// Account-update view of the current position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// None when flat
    pub side: Option<Side>,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub updated_time: DateTime<Utc>,
}

/// Kline interval in the upstream notation ("1", "15", "60", "D", "W")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineInterval {
    Minutes(u32),
    Day,
    Week,
}

impl KlineInterval {
    pub fn duration_ms(&self) -> i64 {
        match self {
            KlineInterval::Minutes(m) => i64::from(*m) * 60_000,
            KlineInterval::Day => 86_400_000,
            KlineInterval::Week => 7 * 86_400_000,
        }
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" | "3" | "5" | "15" | "30" | "60" | "120" | "240" | "360" | "720" => s
                .parse()
                .map(KlineInterval::Minutes)
                .map_err(|e| format!("invalid interval '{}': {}", s, e)),
            "D" => Ok(KlineInterval::Day),
            "W" => Ok(KlineInterval::Week),
            other => Err(format!("unsupported kline interval '{}'", other)),
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KlineInterval::Minutes(m) => write!(f, "{}", m),
            KlineInterval::Day => write!(f, "D"),
            KlineInterval::Week => write!(f, "W"),
        }
    }
}
