//! Scripted in-memory exchange for unit tests

use super::{
    AssetBalance, BracketOrder, ExchangeClient, ExchangeError, MarketOrder, OrderAck, PriceMode,
    SymbolFilters,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SymbolFilters(String),
    Price(String),
    AccountSnapshot,
    MarketBuy { symbol: String, quote_amount: String },
    MarketSell { symbol: String, quantity: String },
    BracketSell(BracketOrder),
    CancelOpenOrders(String),
}

#[derive(Default)]
pub struct MockExchange {
    filters: Mutex<HashMap<String, SymbolFilters>>,
    prices: Mutex<HashMap<String, f64>>,
    balances: Mutex<Vec<AssetBalance>>,
    buy_orders: Mutex<HashMap<String, MarketOrder>>,
    failing: Mutex<HashSet<String>>,
    account_down: Mutex<bool>,
    calls: Mutex<Vec<Call>>,
}

fn mock_failure() -> ExchangeError {
    ExchangeError::Api {
        status: 503,
        code: -1,
        msg: "mock failure".to_string(),
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(self, symbol: &str, min_qty: &str, min_price: &str) -> Self {
        self.filters.lock().unwrap().insert(
            symbol.to_string(),
            SymbolFilters {
                symbol: symbol.to_string(),
                min_qty: min_qty.to_string(),
                max_qty: "9000000.00000000".to_string(),
                step_size: min_qty.to_string(),
                min_price: min_price.to_string(),
                max_price: "1000000.00000000".to_string(),
                tick_size: min_price.to_string(),
            },
        );
        self
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
        self
    }

    pub fn with_balance(self, asset: &str, free: &str, locked: &str) -> Self {
        self.balances.lock().unwrap().push(AssetBalance {
            asset: asset.to_string(),
            free: free.to_string(),
            locked: locked.to_string(),
        });
        self
    }

    pub fn with_buy_order(self, symbol: &str, order: MarketOrder) -> Self {
        self.buy_orders
            .lock()
            .unwrap()
            .insert(symbol.to_string(), order);
        self
    }

    /// Every call naming this symbol fails
    pub fn failing_symbol(self, symbol: &str) -> Self {
        self.failing.lock().unwrap().insert(symbol.to_string());
        self
    }

    pub fn account_unavailable(self) -> Self {
        *self.account_down.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, symbol: &str) -> Result<(), ExchangeError> {
        if self.failing.lock().unwrap().contains(symbol) {
            Err(mock_failure())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        self.record(Call::SymbolFilters(symbol.to_string()));
        self.check(symbol)?;
        self.filters
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn price(&self, symbol: &str, _mode: PriceMode) -> Result<f64, ExchangeError> {
        self.record(Call::Price(symbol.to_string()));
        self.check(symbol)?;
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn account_snapshot(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        self.record(Call::AccountSnapshot);
        if *self.account_down.lock().unwrap() {
            return Err(mock_failure());
        }
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn market_buy(
        &self,
        symbol: &str,
        quote_amount: &str,
    ) -> Result<MarketOrder, ExchangeError> {
        self.record(Call::MarketBuy {
            symbol: symbol.to_string(),
            quote_amount: quote_amount.to_string(),
        });
        self.check(symbol)?;
        self.buy_orders
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(mock_failure)
    }

    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<OrderAck, ExchangeError> {
        self.record(Call::MarketSell {
            symbol: symbol.to_string(),
            quantity: quantity.to_string(),
        });
        self.check(symbol)?;
        Ok(OrderAck {
            order_id: 1,
            status: "FILLED".to_string(),
        })
    }

    async fn bracket_sell(&self, order: &BracketOrder) -> Result<OrderAck, ExchangeError> {
        self.record(Call::BracketSell(order.clone()));
        self.check(&order.symbol)?;
        Ok(OrderAck {
            order_id: 2,
            status: "EXECUTING".to_string(),
        })
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(Call::CancelOpenOrders(symbol.to_string()));
        self.check(symbol)
    }
}
