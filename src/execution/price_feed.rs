use crate::api::{ExchangeClient, PriceMode};
use crate::config::BotConfig;
use crate::models::Sample;
use crate::shutdown::{self, StopSignal};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::Instrument;

/// Polls every basket symbol once per tick and publishes the prices.
/// Simple and stupid: no retries, a failed query just means no sample.
pub struct PriceSampler {
    client: Arc<dyn ExchangeClient>,
    symbols: Vec<String>,
    interval: Duration,
    mode: PriceMode,
    tick: u64,
}

impl PriceSampler {
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        symbols: Vec<String>,
        interval: Duration,
        mode: PriceMode,
    ) -> Self {
        Self {
            client,
            symbols,
            interval,
            mode,
            tick: 0,
        }
    }

    pub fn from_config(client: Arc<dyn ExchangeClient>, config: &BotConfig) -> Self {
        Self::new(
            client,
            config.policy.symbols.clone(),
            config.sample_interval(),
            config.policy.sample.price_mode,
        )
    }

    /// Last tick handed out; 0 before the first round
    pub fn tick(&self) -> u64 {
        self.tick
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Query one symbol's price for `tick`
    pub async fn sample(
        client: &dyn ExchangeClient,
        symbol: &str,
        tick: u64,
        mode: PriceMode,
    ) -> Option<Sample> {
        match client.price(symbol, mode).await {
            Ok(price) => {
                tracing::debug!(symbol, tick, price, "Sampled price");
                Some(Sample::new(tick, symbol, price))
            }
            Err(e) => {
                tracing::warn!(symbol, tick, "Price query failed: {}", e);
                None
            }
        }
    }

    /// Start one sampling round: a background query per symbol, each
    /// publishing its own sample. Returns without waiting for them.
    pub fn dispatch_tick(&mut self, samples: &mpsc::Sender<Sample>) -> Vec<JoinHandle<()>> {
        let tick = self.next_tick();

        self.symbols
            .iter()
            .map(|symbol| {
                let client = self.client.clone();
                let samples = samples.clone();
                let symbol = symbol.clone();
                let mode = self.mode;

                tokio::spawn(
                    async move {
                        let Some(sample) = Self::sample(client.as_ref(), &symbol, tick, mode).await
                        else {
                            return;
                        };
                        if samples.send(sample).await.is_err() {
                            tracing::debug!(symbol = %symbol, tick, "Price channel closed");
                        }
                    }
                    .in_current_span(),
                )
            })
            .collect()
    }

    /// Sample on a fixed interval until stopped. The first round fires one
    /// interval after start.
    pub async fn run(mut self, samples: mpsc::Sender<Sample>, mut stop: StopSignal) {
        tracing::info!(
            symbols = self.symbols.len(),
            interval_secs = self.interval.as_secs_f64(),
            mode = ?self.mode,
            "Sampler started"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => {
                    tracing::info!(tick = self.tick, "Sampler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    // queries are fire and forget
                    self.dispatch_tick(&samples);
                }
            }
        }
    }
}
