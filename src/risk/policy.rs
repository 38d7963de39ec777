use crate::config::BotConfig;
use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Offset of the exchange-local trading day from UTC
pub const TRADING_DAY_UTC_OFFSET_SECS: i64 = 8 * 3600;

/// Daily trading hours, as offsets from midnight in UTC+8
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingWindow {
    pub from_secs: u64,
    pub to_secs: u64,
}

impl TradingWindow {
    pub fn new(from_secs: u64, to_secs: u64) -> Self {
        Self { from_secs, to_secs }
    }

    /// Start and end of the window for the trading day containing `now`
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let offset = Duration::seconds(TRADING_DAY_UTC_OFFSET_SECS);
        let local_day = (now + offset).date_naive();
        let midnight = local_day.and_time(NaiveTime::MIN).and_utc() - offset;

        (
            midnight + Duration::seconds(self.from_secs as i64),
            midnight + Duration::seconds(self.to_secs as i64),
        )
    }

    /// Strictly inside the window; the boundaries themselves are closed
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let (start, end) = self.bounds(now);
        start < now && now < end
    }
}

/// Take-profit and stop prices derived from an entry price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketPrices {
    pub take_profit: f64,
    pub stop_trigger: f64,
    pub stop_limit: f64,
}

/// Immutable risk snapshot the trader works from
#[derive(Debug, Clone, PartialEq)]
pub struct RiskPolicy {
    pub stop_loss: f64,
    pub stop_profit: f64,
    /// Fraction of free quote balance a BUY signal may spend
    pub position: f64,
    pub usdt_per_buy: f64,
    pub max_usdt_per_buy: f64,
    pub one_by_one: bool,
    pub dry_run: bool,
    pub window: TradingWindow,
    pub quote_asset: String,
}

impl RiskPolicy {
    pub fn from_config(config: &BotConfig) -> Self {
        let trade = &config.policy.trade;
        Self {
            stop_loss: trade.stop_loss,
            stop_profit: trade.stop_profit,
            position: trade.position,
            usdt_per_buy: trade.usdt_per_buy,
            max_usdt_per_buy: trade.max_usdt_per_buy,
            one_by_one: trade.one_by_one,
            dry_run: config.policy.dryrun,
            window: TradingWindow::new(trade.span.from_secs, trade.span.to_secs),
            quote_asset: config.policy.quote_asset.clone(),
        }
    }

    /// Quote amount spent per symbol
    pub fn stake(&self) -> f64 {
        self.usdt_per_buy.min(self.max_usdt_per_buy)
    }

    /// Spendable budget out of the free quote balance
    pub fn budget(&self, free_quote: f64) -> f64 {
        free_quote * self.position
    }

    /// Symbols that get a buy, in signal order, while the budget lasts
    pub fn plan_buys(&self, budget: f64, symbols: &[String]) -> Vec<String> {
        let stake = self.stake();
        let mut remaining = budget;
        let mut planned = Vec::new();

        for symbol in symbols {
            if remaining < stake {
                tracing::warn!(
                    remaining,
                    stake,
                    skipped = symbols.len() - planned.len(),
                    "Insufficient funds, skipping remaining buys"
                );
                break;
            }

            remaining -= stake;
            planned.push(symbol.clone());

            if self.one_by_one {
                break;
            }
        }

        planned
    }

    pub fn bracket(&self, avg_price: f64) -> BracketPrices {
        let stop = avg_price * (1.0 - self.stop_loss);
        BracketPrices {
            take_profit: avg_price * (1.0 + self.stop_profit),
            stop_trigger: stop,
            stop_limit: stop,
        }
    }

    /// Base asset of a symbol quoted in this policy's quote asset
    pub fn base_asset<'a>(&self, symbol: &'a str) -> Option<&'a str> {
        symbol
            .strip_suffix(self.quote_asset.as_str())
            .filter(|base| !base.is_empty())
    }
}
