//! Wires sampler, oracle and trader together.
//!
//! Owns no trading logic: builds the components from one configuration,
//! connects them with two bounded channels and spawns each loop as its
//! own task under its own tracing span.

use crate::api::ExchangeClient;
use crate::config::BotConfig;
use crate::execution::{BalanceTracker, PriceSampler, Quantizer, Trader};
use crate::risk::RiskPolicy;
use crate::shutdown::StopSignal;
use crate::strategy::TrendOracle;
use crate::Result;
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub struct Pipeline {
    config: BotConfig,
    client: Arc<dyn ExchangeClient>,
    quantizer: Arc<Quantizer>,
}

impl Pipeline {
    /// Validate the configuration and fetch every symbol's filters.
    /// A symbol without filters fails the build.
    pub async fn build(config: BotConfig, client: Arc<dyn ExchangeClient>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let mut filters = Vec::with_capacity(config.policy.symbols.len());
        for symbol in &config.policy.symbols {
            let symbol_filters = client
                .symbol_filters(symbol)
                .await
                .with_context(|| format!("Failed to fetch filters for {}", symbol))?;
            filters.push(symbol_filters);
        }

        let quantizer = Quantizer::from_filters(&filters).context("Unusable symbol filters")?;
        tracing::info!(symbols = quantizer.len(), "Loaded symbol filters");

        Ok(Self {
            config,
            client,
            quantizer: Arc::new(quantizer),
        })
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    /// Spawn every loop and return immediately
    pub fn start(&self, stop: StopSignal) -> PipelineHandle {
        let channels = &self.config.channels;
        let (price_tx, price_rx) = mpsc::channel(channels.price_capacity.max(1));
        let (order_tx, order_rx) = mpsc::channel(channels.order_capacity.max(1));
        let policy_name = self.config.policy.name.as_str();

        let balances = BalanceTracker::new(self.client.clone());
        let account = tokio::spawn(
            async move {
                match balances.get_account().await {
                    Ok(assets) => {
                        for b in assets {
                            tracing::info!(asset = %b.asset, free = %b.free, locked = %b.locked, "Balance");
                        }
                    }
                    Err(e) => tracing::warn!("Could not fetch account: {}", e),
                }
            }
            .instrument(tracing::info_span!("account")),
        );

        let sampler = PriceSampler::from_config(self.client.clone(), &self.config);
        let oracle = TrendOracle::from_config(&self.config);
        let trader = Trader::new(
            self.client.clone(),
            self.quantizer.clone(),
            RiskPolicy::from_config(&self.config),
        );

        let tasks = vec![
            (
                "sampler",
                tokio::spawn(
                    sampler
                        .run(price_tx, stop.clone())
                        .instrument(tracing::info_span!("sampler", policy = policy_name)),
                ),
            ),
            (
                "oracle",
                tokio::spawn(
                    oracle
                        .run(price_rx, order_tx, stop.clone())
                        .instrument(tracing::info_span!("oracle", policy = policy_name)),
                ),
            ),
            (
                "trader",
                tokio::spawn(
                    trader
                        .run(order_rx, stop)
                        .instrument(tracing::info_span!("trader", policy = policy_name)),
                ),
            ),
            ("account", account),
        ];

        tracing::info!("All loops spawned");
        PipelineHandle { tasks }
    }
}

/// Join handles of the running loops
pub struct PipelineHandle {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PipelineHandle {
    /// Wait for every loop to return, which happens after stop fires
    pub async fn wait_until_completion(self) -> Result<()> {
        for (name, task) in self.tasks {
            task.await
                .with_context(|| format!("{} task panicked", name))?;
            tracing::debug!("{} finished", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{Call, MockExchange};
    use crate::shutdown;
    use std::time::Duration;

    const CONFIG: &str = r#"
[exchange]
api_key = "key"
secret_key = "secret"

[policy]
name = "test"
dryrun = true
symbols = ["BTCUSDT", "ETHUSDT"]

[policy.sample]
interval_secs = 1
window_secs = 3
slide_detect = true

[policy.trigger]
buy_threshold = 0.5
sell_threshold = 0.5

[policy.trade]
one_by_one = false
stop_loss = 0.05
stop_profit = 0.1
position = 0.5
usdt_per_buy = 20.0
max_usdt_per_buy = 50.0
"#;

    fn config() -> BotConfig {
        BotConfig::from_toml_str(CONFIG).unwrap()
    }

    fn exchange() -> MockExchange {
        MockExchange::new()
            .with_filters("BTCUSDT", "0.00001000", "0.01000000")
            .with_filters("ETHUSDT", "0.00010000", "0.01000000")
            .with_price("BTCUSDT", 64000.0)
            .with_price("ETHUSDT", 3100.0)
            .with_balance("USDT", "100.0", "0.0")
    }

    #[tokio::test]
    async fn test_build_loads_filters_for_every_symbol() {
        let pipeline = Pipeline::build(config(), Arc::new(exchange())).await.unwrap();

        let btc = pipeline.quantizer().extra("BTCUSDT").unwrap();
        assert_eq!(btc.qty_precision, 5);
        assert!(pipeline.quantizer().extra("ETHUSDT").is_some());
    }

    #[tokio::test]
    async fn test_build_fails_on_missing_filters() {
        let exchange = MockExchange::new().with_filters("BTCUSDT", "0.00001000", "0.01000000");

        let err = Pipeline::build(config(), Arc::new(exchange))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("ETHUSDT"));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = config();
        config.policy.symbols.clear();

        assert!(Pipeline::build(config, Arc::new(exchange())).await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let exchange = Arc::new(exchange());
        let pipeline = Pipeline::build(config(), exchange.clone()).await.unwrap();

        let (stop_tx, stop_rx) = shutdown::channel();
        let handle = pipeline.start(stop_rx);

        // let the first sampling round go out
        tokio::time::sleep(Duration::from_millis(1300)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle.wait_until_completion())
            .await
            .unwrap()
            .unwrap();

        let calls = exchange.calls();
        assert!(calls.contains(&Call::AccountSnapshot));
        assert!(calls.contains(&Call::Price("BTCUSDT".to_string())));
    }
}
