use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One price observation for one symbol, taken during sampling round `tick`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub tick: u64,
    pub symbol: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(tick: u64, symbol: impl Into<String>, price: f64) -> Self {
        Self {
            tick,
            symbol: symbol.into(),
            price,
            observed_at: Utc::now(),
        }
    }
}

/// Price movement between two consecutive ticks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Direction {
    Rise,
    #[default]
    Flat,
    Fall,
}

impl Direction {
    /// Compare the current price against the previous tick's price
    pub fn between(prev_price: f64, cur_price: f64) -> Self {
        if prev_price < cur_price {
            Direction::Rise
        } else if prev_price > cur_price {
            Direction::Fall
        } else {
            Direction::Flat
        }
    }

    /// Score contribution: +1, 0 or -1
    pub fn score(self) -> i64 {
        match self {
            Direction::Rise => 1,
            Direction::Flat => 0,
            Direction::Fall => -1,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            Direction::Rise => "↗",
            Direction::Flat => "-",
            Direction::Fall => "↘",
        }
    }
}

/// One ring-buffer cell. `tick` tells a fresh write apart from a leftover
/// of an earlier lap around the ring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Slot {
    pub tick: u64,
    pub price: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalKind {
    Buy,
    Sell,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Sell => write!(f, "SELL"),
        }
    }
}

/// Trading signal emitted by the oracle for a group of symbols
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub symbols: Vec<String>,
}

impl Signal {
    pub fn buy(symbols: Vec<String>) -> Self {
        Self {
            kind: SignalKind::Buy,
            symbols,
        }
    }

    pub fn sell(symbols: Vec<String>) -> Self {
        Self {
            kind: SignalKind::Sell,
            symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(Direction::between(100.0, 101.0), Direction::Rise);
        assert_eq!(Direction::between(100.0, 99.5), Direction::Fall);
        assert_eq!(Direction::between(100.0, 100.0), Direction::Flat);
    }

    #[test]
    fn test_direction_score() {
        assert_eq!(Direction::Rise.score(), 1);
        assert_eq!(Direction::Flat.score(), 0);
        assert_eq!(Direction::Fall.score(), -1);
    }

    #[test]
    fn test_default_slot_is_empty() {
        let slot = Slot::default();
        assert_eq!(slot.tick, 0);
        assert_eq!(slot.direction, Direction::Flat);
    }

    #[test]
    fn test_signal_constructors() {
        let signal = Signal::sell(vec!["BTCUSDT".to_string()]);
        assert_eq!(signal.kind, SignalKind::Sell);
        assert_eq!(signal.symbols, vec!["BTCUSDT"]);
        assert_eq!(SignalKind::Buy.to_string(), "BUY");
    }
}
