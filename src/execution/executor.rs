use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::api::{BracketOrder, ExchangeClient, ExchangeError, MarketOrder, OrderAck, OrderStatus};
use crate::execution::{BalanceError, BalanceTracker, Quantizer};
use crate::models::{Signal, SignalKind};
use crate::risk::RiskPolicy;
use crate::shutdown::{self, StopSignal};

#[derive(Debug, Error)]
pub enum TradeError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error("Order {order_id} for {symbol} ended {status:?}, expected FILLED")]
    NotFilled {
        symbol: String,
        order_id: i64,
        status: OrderStatus,
    },

    #[error("Unparseable fill {field} {value:?} for {symbol}")]
    FillField {
        symbol: String,
        field: &'static str,
        value: String,
    },

    #[error("Non-positive {what} {value} for {symbol}")]
    NonPositive {
        symbol: String,
        what: &'static str,
        value: f64,
    },

    #[error("{what} {value} for {symbol} is below one step")]
    BelowStep {
        symbol: String,
        what: &'static str,
        value: f64,
    },
}

/// Normalized amount, unless truncation left nothing
fn above_zero(
    symbol: &str,
    what: &'static str,
    raw: f64,
    normalized: String,
) -> Result<String, TradeError> {
    match Decimal::from_str(&normalized) {
        Ok(amount) if amount > Decimal::ZERO => Ok(normalized),
        _ => Err(TradeError::BelowStep {
            symbol: symbol.to_string(),
            what,
            value: raw,
        }),
    }
}

/// What the fills of a market buy add up to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillSummary {
    /// Quantity-weighted average fill price
    pub avg_price: f64,
    pub filled_qty: f64,
    /// Filled quantity minus commission, commission taken as base asset
    pub net_qty: f64,
}

/// Weighted-average price and net quantity of a filled buy
pub fn summarize_fills(symbol: &str, order: &MarketOrder) -> Result<FillSummary, TradeError> {
    let parse = |field: &'static str, value: &str| {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| TradeError::FillField {
                symbol: symbol.to_string(),
                field,
                value: value.to_string(),
            })
    };

    let mut cost = 0.0;
    let mut filled_qty = 0.0;
    let mut commission = 0.0;

    for fill in &order.fills {
        let price = parse("price", &fill.price)?;
        let qty = parse("qty", &fill.qty)?;
        cost += price * qty;
        filled_qty += qty;
        commission += parse("commission", &fill.commission)?;
    }

    if filled_qty <= 0.0 {
        return Err(TradeError::NonPositive {
            symbol: symbol.to_string(),
            what: "filled quantity",
            value: filled_qty,
        });
    }

    let net_qty = filled_qty - commission;
    if net_qty <= 0.0 {
        return Err(TradeError::NonPositive {
            symbol: symbol.to_string(),
            what: "net quantity",
            value: net_qty,
        });
    }

    Ok(FillSummary {
        avg_price: cost / filled_qty,
        filled_qty,
        net_qty,
    })
}

/// Result of handling one signal
#[derive(Debug)]
pub enum Dispatch {
    Skipped { reason: String },
    /// Orders placed in the background, one task per symbol
    Dispatched { orders: Vec<JoinHandle<()>> },
}

impl Dispatch {
    fn skipped(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!("Signal skipped: {}", reason);
        Dispatch::Skipped { reason }
    }

    /// Wait for every background order task. Only tests need this; the
    /// run loop never joins them.
    pub async fn settle(self) {
        if let Dispatch::Dispatched { orders } = self {
            for order in orders {
                if let Err(e) = order.await {
                    tracing::error!("Order task failed: {}", e);
                }
            }
        }
    }
}

/// Turns signals into exchange orders under the risk policy
#[derive(Clone)]
pub struct Trader {
    client: Arc<dyn ExchangeClient>,
    balances: BalanceTracker,
    quantizer: Arc<Quantizer>,
    policy: Arc<RiskPolicy>,
}

impl Trader {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        quantizer: Arc<Quantizer>,
        policy: RiskPolicy,
    ) -> Self {
        Self {
            balances: BalanceTracker::new(client.clone()),
            client,
            quantizer,
            policy: Arc::new(policy),
        }
    }

    /// Apply the trading-hours and dry-run gates, then place orders
    pub async fn handle_signal(&self, signal: Signal, now: DateTime<Utc>) -> Dispatch {
        tracing::info!(kind = %signal.kind, symbols = ?signal.symbols, "Received signal");

        if !self.policy.window.contains(now) {
            let (start, end) = self.policy.window.bounds(now);
            return Dispatch::skipped(format!(
                "{} outside trading hours {} - {}",
                now, start, end
            ));
        }

        if self.policy.dry_run {
            return Dispatch::skipped(format!("dry run, not placing {}", signal.kind));
        }

        let orders = match signal.kind {
            SignalKind::Buy => self.process_buy(&signal.symbols).await,
            SignalKind::Sell => self.process_sell(&signal.symbols).await,
        };
        Dispatch::Dispatched { orders }
    }

    /// Spend the budget on market buys, each followed by a bracket sell
    pub async fn process_buy(&self, symbols: &[String]) -> Vec<JoinHandle<()>> {
        let quote = &self.policy.quote_asset;
        let free = match self.balances.get_balance(quote).await {
            Ok((free, _locked)) => free,
            Err(e) => {
                tracing::error!("Cannot read {} balance, skipping buys: {}", quote, e);
                return Vec::new();
            }
        };

        let budget = self.policy.budget(free);
        let planned = self.policy.plan_buys(budget, symbols);
        let quote_amount = format!("{:.8}", self.policy.stake());

        tracing::info!(free, budget, planned = ?planned, "Placing buys");

        planned
            .into_iter()
            .map(|symbol| {
                let trader = self.clone();
                let quote_amount = quote_amount.clone();
                tokio::spawn(
                    async move {
                        match trader.buy_and_bracket(&symbol, &quote_amount).await {
                            Ok(ack) => tracing::info!(
                                symbol = %symbol,
                                order_id = ack.order_id,
                                status = %ack.status,
                                "Bracket placed"
                            ),
                            Err(e) => tracing::error!(symbol = %symbol, "Buy aborted: {}", e),
                        }
                    }
                    .in_current_span(),
                )
            })
            .collect()
    }

    async fn buy_and_bracket(
        &self,
        symbol: &str,
        quote_amount: &str,
    ) -> Result<OrderAck, TradeError> {
        let order = self.client.market_buy(symbol, quote_amount).await?;

        if order.status != OrderStatus::Filled {
            return Err(TradeError::NotFilled {
                symbol: symbol.to_string(),
                order_id: order.order_id,
                status: order.status,
            });
        }

        let fills = summarize_fills(symbol, &order)?;
        tracing::info!(
            symbol,
            order_id = order.order_id,
            avg_price = fills.avg_price,
            net_qty = fills.net_qty,
            "Market buy filled"
        );

        let quantity = above_zero(
            symbol,
            "Net quantity",
            fills.net_qty,
            self.quantizer.normalize_quantity(symbol, fills.net_qty),
        )?;

        let prices = self.policy.bracket(fills.avg_price);
        let bracket = BracketOrder {
            symbol: symbol.to_string(),
            quantity,
            limit_price: self.quantizer.normalize_price(symbol, prices.take_profit),
            stop_price: self.quantizer.normalize_price(symbol, prices.stop_trigger),
            stop_limit_price: self.quantizer.normalize_price(symbol, prices.stop_limit),
        };

        Ok(self.client.bracket_sell(&bracket).await?)
    }

    /// Cancel open orders for every symbol, then sell whatever is held
    pub async fn process_sell(&self, symbols: &[String]) -> Vec<JoinHandle<()>> {
        let mut cancels = JoinSet::new();
        for symbol in symbols {
            let client = self.client.clone();
            let symbol = symbol.clone();
            cancels.spawn(
                async move {
                    if let Err(e) = client.cancel_open_orders(&symbol).await {
                        tracing::warn!(symbol = %symbol, "Cancel open orders failed: {}", e);
                    }
                }
                .in_current_span(),
            );
        }
        while let Some(joined) = cancels.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Cancel task failed: {}", e);
            }
        }

        let balances = match self.balances.get_balance_map().await {
            Ok(balances) => balances,
            Err(e) => {
                tracing::error!("Cannot read balances, skipping sells: {}", e);
                return Vec::new();
            }
        };

        symbols
            .iter()
            .filter_map(|symbol| self.spawn_sell(symbol, &balances))
            .collect()
    }

    fn spawn_sell(&self, symbol: &str, balances: &HashMap<String, f64>) -> Option<JoinHandle<()>> {
        let Some(base) = self.policy.base_asset(symbol) else {
            tracing::warn!(symbol, quote = %self.policy.quote_asset, "Symbol not in quote asset, not selling");
            return None;
        };

        let held = balances.get(base).copied().unwrap_or(0.0);
        if held <= 0.0 {
            tracing::warn!(symbol, asset = base, held, "Nothing to sell");
            return None;
        }

        let normalized = self.quantizer.normalize_quantity(symbol, held);
        let quantity = match above_zero(symbol, "Held quantity", held, normalized) {
            Ok(quantity) => quantity,
            Err(e) => {
                tracing::warn!(symbol, asset = base, "Not selling: {}", e);
                return None;
            }
        };
        let client = self.client.clone();
        let symbol = symbol.to_string();

        Some(tokio::spawn(
            async move {
                match client.market_sell(&symbol, &quantity).await {
                    Ok(ack) => tracing::info!(
                        symbol = %symbol,
                        quantity = %quantity,
                        order_id = ack.order_id,
                        status = %ack.status,
                        "Market sell placed"
                    ),
                    Err(e) => tracing::error!(symbol = %symbol, "Market sell failed: {}", e),
                }
            }
            .in_current_span(),
        ))
    }

    /// Consume signals until stopped or the order channel closes
    pub async fn run(self, mut signals: mpsc::Receiver<Signal>, mut stop: StopSignal) {
        tracing::info!(
            dry_run = self.policy.dry_run,
            stake = self.policy.stake(),
            "Trader started"
        );

        loop {
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => {
                    tracing::info!("Trader stopped");
                    break;
                }
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        tracing::info!("Order channel closed, trader exiting");
                        break;
                    };
                    // order tasks are fire and forget
                    drop(self.handle_signal(signal, Utc::now()).await);
                }
            }
        }
    }
}
