pub mod binance;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use binance::BinanceClient;

/// Errors raised by an exchange client
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange API error (status {status}, code {code}): {msg}")]
    Api { status: u16, code: i64, msg: String },

    #[error("Failed to decode exchange response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("Symbol {symbol} has no {filter} filter")]
    MissingFilter { symbol: String, filter: &'static str },

    #[error("Invalid price {value:?} for {symbol}")]
    InvalidPrice { symbol: String, value: String },

    #[error("Failed to sign request: {0}")]
    Signing(String),
}

/// Which price the sampler asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    /// Rolling average price maintained by the exchange
    #[default]
    Average,
    /// Last traded price
    Realtime,
}

/// Raw lot-size and price filters of a symbol, as the exchange reports them
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    pub symbol: String,
    pub min_qty: String,
    pub max_qty: String,
    pub step_size: String,
    pub min_price: String,
    pub max_price: String,
    pub tick_size: String,
}

/// Balance line of an account snapshot. Amounts are kept as the exchange
/// sent them so callers decide how to treat unparseable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    ExpiredInMatch,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub price: String,
    pub qty: String,
    pub commission: String,
    #[serde(default)]
    pub commission_asset: String,
}

/// Result of a market order together with its fills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrder {
    pub order_id: i64,
    pub status: OrderStatus,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

/// Acknowledgement of an order (or order list) placement
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub status: String,
}

/// Take-profit limit plus stop-limit sell covering one position.
/// All values are already normalized to the symbol's filters.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrder {
    pub symbol: String,
    pub quantity: String,
    pub limit_price: String,
    pub stop_price: String,
    pub stop_limit_price: String,
}

/// Operations the trading pipeline needs from an exchange.
///
/// Implementations must be safe to call concurrently from every loop.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;

    async fn price(&self, symbol: &str, mode: PriceMode) -> Result<f64, ExchangeError>;

    async fn account_snapshot(&self) -> Result<Vec<AssetBalance>, ExchangeError>;

    /// Market buy spending `quote_amount` of the quote asset
    async fn market_buy(&self, symbol: &str, quote_amount: &str)
        -> Result<MarketOrder, ExchangeError>;

    /// Market sell of `quantity` base units
    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<OrderAck, ExchangeError>;

    async fn bracket_sell(&self, order: &BracketOrder) -> Result<OrderAck, ExchangeError>;

    async fn cancel_open_orders(&self, symbol: &str) -> Result<(), ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_parsing() {
        let status: OrderStatus = serde_json::from_str("\"FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::Filled);

        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);

        let status: OrderStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(status, OrderStatus::Unknown);
    }

    #[test]
    fn test_price_mode_parsing() {
        let mode: PriceMode = serde_json::from_str("\"realtime\"").unwrap();
        assert_eq!(mode, PriceMode::Realtime);
        assert_eq!(PriceMode::default(), PriceMode::Average);
    }

    #[test]
    fn test_market_order_without_fills() {
        let order: MarketOrder =
            serde_json::from_str(r#"{"orderId": 7, "status": "NEW"}"#).unwrap();
        assert_eq!(order.order_id, 7);
        assert!(order.fills.is_empty());
    }
}
