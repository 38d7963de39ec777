//! Bot configuration
//!
//! Loaded from a TOML file, then overridden by `BASKETBOT__`-prefixed
//! environment variables (e.g. `BASKETBOT__EXCHANGE__SECRET_KEY`).

use crate::api::binance::{BINANCE_API_BASE, BINANCE_TESTNET_API_BASE};
use crate::api::PriceMode;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./config/basketbot.toml";
const ENV_PREFIX: &str = "BASKETBOT";
const MIN_USDT_PER_BUY: f64 = 10.0;
const MAX_USDT_PER_BUY: f64 = 100.0;
const MAX_SPAN_SECS: u64 = 48 * 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub exchange: ExchangeConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_exchange_name")]
    pub name: String,
    /// Overrides the production/testnet REST root
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub dryrun: bool,
    pub symbols: Vec<String>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    pub sample: SampleConfig,
    pub trigger: TriggerConfig,
    pub trade: TradeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleConfig {
    pub interval_secs: u64,
    pub window_secs: u64,
    /// Score every tick once the first window is full, instead of once per window
    #[serde(default)]
    pub slide_detect: bool,
    #[serde(default)]
    pub price_mode: PriceMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeConfig {
    #[serde(default)]
    pub one_by_one: bool,
    pub stop_loss: f64,
    pub stop_profit: f64,
    /// Fraction of the free quote balance available for one BUY signal
    pub position: f64,
    pub usdt_per_buy: f64,
    pub max_usdt_per_buy: f64,
    #[serde(default)]
    pub span: SpanConfig,
}

/// Trading hours as offsets from midnight (UTC+8)
#[derive(Debug, Clone, Deserialize)]
pub struct SpanConfig {
    pub from_secs: u64,
    pub to_secs: u64,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            from_secs: 0,
            to_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub price_capacity: usize,
    pub order_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            price_capacity: 20,
            order_capacity: 40,
        }
    }
}

fn default_exchange_name() -> String {
    "binance".to_string()
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

impl BotConfig {
    /// Load configuration from a file, layering environment overrides on top
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).required(true))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("policy.symbols"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(content, ::config::FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, dry_run: bool) {
        if dry_run {
            self.policy.dryrun = true;
        }
    }

    /// Check every value the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = &self.policy;

        if policy.symbols.is_empty() {
            return invalid("symbols should not be empty");
        }

        let mut seen = HashSet::new();
        for symbol in &policy.symbols {
            if !seen.insert(symbol) {
                return invalid(format!("duplicate symbol {}", symbol));
            }
            if symbol.len() <= policy.quote_asset.len() || !symbol.ends_with(&policy.quote_asset)
            {
                return invalid(format!(
                    "symbol {} is not quoted in {}",
                    symbol, policy.quote_asset
                ));
            }
        }

        let trigger = &policy.trigger;
        if trigger.buy_threshold <= 0.0 || trigger.buy_threshold > 1.0 {
            return invalid("invalid buy threshold, should be within (0,1]");
        }
        if trigger.sell_threshold <= 0.0 || trigger.sell_threshold > 1.0 {
            return invalid("invalid sell threshold, should be within (0,1]");
        }

        let trade = &policy.trade;
        if trade.position <= 0.0 || trade.position > 1.0 {
            return invalid(format!(
                "invalid position {}, should be within (0,1]",
                trade.position
            ));
        }
        if trade.usdt_per_buy < MIN_USDT_PER_BUY || trade.usdt_per_buy >= trade.max_usdt_per_buy
        {
            return invalid(format!(
                "invalid usdt per buy {}, should be within [{}, max_usdt_per_buy)",
                trade.usdt_per_buy, MIN_USDT_PER_BUY
            ));
        }
        if trade.max_usdt_per_buy < MIN_USDT_PER_BUY || trade.max_usdt_per_buy > MAX_USDT_PER_BUY {
            return invalid(format!(
                "invalid max usdt per buy {}, should be within [{}, {}]",
                trade.max_usdt_per_buy, MIN_USDT_PER_BUY, MAX_USDT_PER_BUY
            ));
        }
        if trade.stop_loss <= 0.0 || trade.stop_loss >= 1.0 {
            return invalid("invalid stop loss, should be within (0,1)");
        }
        if trade.stop_profit <= 0.0 {
            return invalid("invalid stop profit, should be positive");
        }
        if trade.span.from_secs >= trade.span.to_secs || trade.span.to_secs > MAX_SPAN_SECS {
            return invalid(format!(
                "invalid trading span {}..{}",
                trade.span.from_secs, trade.span.to_secs
            ));
        }

        if policy.sample.interval_secs == 0 {
            return invalid("sample interval should be positive");
        }
        if self.window_len() < 2 {
            return invalid(format!(
                "window {}s holds fewer than 2 samples of {}s",
                policy.sample.window_secs, policy.sample.interval_secs
            ));
        }

        let basket = policy.symbols.len();
        if self.channels.price_capacity < basket || self.channels.order_capacity == 0 {
            return invalid(format!(
                "channel capacities ({}, {}) too small for {} symbols",
                self.channels.price_capacity, self.channels.order_capacity, basket
            ));
        }

        Ok(())
    }

    /// Number of slots in each symbol's window
    pub fn window_len(&self) -> u64 {
        let sample = &self.policy.sample;
        if sample.interval_secs == 0 {
            return 0;
        }
        sample.window_secs / sample.interval_secs
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.policy.sample.interval_secs)
    }

    pub fn base_url(&self) -> String {
        match &self.exchange.api_url {
            Some(url) => url.clone(),
            None if self.policy.testnet => BINANCE_TESTNET_API_BASE.to_string(),
            None => BINANCE_API_BASE.to_string(),
        }
    }
}
