use super::epoch::{Epoch, Recorded};
use crate::config::BotConfig;
use crate::models::{Sample, Signal};
use crate::shutdown::{self, StopSignal};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Scoring parameters of the oracle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OracleSettings {
    pub window_len: u64,
    /// Score every tick once the first window is full, instead of once per window
    pub slide: bool,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
}

impl OracleSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            window_len: config.window_len(),
            slide: config.policy.sample.slide_detect,
            buy_threshold: config.policy.trigger.buy_threshold,
            sell_threshold: config.policy.trigger.sell_threshold,
        }
    }
}

/// Basket partition after scoring one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Groups {
    pub rise: Vec<String>,
    pub fall: Vec<String>,
    pub other: Vec<String>,
}

/// Sliding-window consensus detector over the whole symbol basket.
///
/// Waits until every symbol reported the current tick, then scores each
/// symbol's window and turns the share of monotonic risers and fallers
/// into BUY or SELL signals. Owns all epochs; only its own loop mutates them.
pub struct TrendOracle {
    symbols: Vec<String>,
    epochs: HashMap<String, Epoch>,
    settings: OracleSettings,
    current_tick: u64,
    arrivals: usize,
}

impl TrendOracle {
    pub fn new(symbols: Vec<String>, settings: OracleSettings) -> Self {
        let epochs = symbols
            .iter()
            .map(|s| (s.clone(), Epoch::new(settings.window_len as usize)))
            .collect();

        Self {
            symbols,
            epochs,
            settings,
            current_tick: 0,
            arrivals: 0,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.policy.symbols.clone(),
            OracleSettings::from_config(config),
        )
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Samples received for the current tick so far
    pub fn arrivals(&self) -> usize {
        self.arrivals
    }

    pub fn epoch(&self, symbol: &str) -> Option<&Epoch> {
        self.epochs.get(symbol)
    }

    /// Feed one sample; returns a signal when this sample completed a
    /// mature tick whose scores cross a threshold.
    pub fn on_sample(&mut self, sample: &Sample) -> Option<Signal> {
        let tick = sample.tick;
        let symbol = sample.symbol.as_str();

        let Some(epoch) = self.epochs.get_mut(symbol) else {
            tracing::warn!(symbol, tick, "Discarding sample for unknown symbol");
            return None;
        };

        if tick < self.current_tick {
            tracing::warn!(
                symbol,
                tick,
                current_tick = self.current_tick,
                "Discarding stale sample"
            );
            return None;
        }

        let recorded = epoch.record(tick, sample.price);
        if recorded == Recorded::Duplicate {
            tracing::warn!(symbol, tick, "Discarding duplicate sample");
            return None;
        }

        if tick > self.current_tick {
            if self.current_tick > 0 && self.arrivals < self.symbols.len() {
                tracing::debug!(
                    tick = self.current_tick,
                    arrivals = self.arrivals,
                    "Abandoning tick without quorum"
                );
            }
            self.current_tick = tick;
            self.arrivals = 0;
        }
        self.arrivals += 1;

        match recorded {
            Recorded::Scored(direction) => tracing::debug!(
                symbol,
                tick,
                price = sample.price,
                "{}",
                direction.arrow()
            ),
            Recorded::Unanchored if tick > 1 => tracing::warn!(
                symbol,
                tick,
                "Previous tick missing, recording as flat"
            ),
            _ => {}
        }

        if !self.is_mature(tick) {
            return None;
        }

        let groups = self.group_symbols(tick);
        tracing::info!(
            tick,
            rise = ?groups.rise,
            fall = ?groups.fall,
            other = groups.other.len(),
            "Scored window"
        );
        self.decide(groups)
    }

    fn is_mature(&self, tick: u64) -> bool {
        if self.arrivals != self.symbols.len() {
            return false;
        }
        let window_len = self.settings.window_len;
        if window_len == 0 {
            return false;
        }
        if self.settings.slide {
            tick >= window_len
        } else {
            tick % window_len == 0
        }
    }

    /// Partition the basket by each symbol's window ending at `tick`.
    /// A symbol with any stale slot in its window lands in `other`.
    pub fn group_symbols(&self, tick: u64) -> Groups {
        let mut groups = Groups::default();

        for symbol in &self.symbols {
            let Some(epoch) = self.epochs.get(symbol) else {
                continue;
            };
            let max = epoch.max_score();

            match epoch.window_score(tick) {
                Some(score) if score == max => groups.rise.push(symbol.clone()),
                Some(score) if score == -max => groups.fall.push(symbol.clone()),
                Some(score) => {
                    tracing::debug!(symbol = %symbol, tick, score, trend = %epoch.trend_line(tick), "Mixed window");
                    groups.other.push(symbol.clone());
                }
                None => {
                    tracing::warn!(symbol = %symbol, tick, trend = %epoch.trend_line(tick), "Window has stale slots");
                    groups.other.push(symbol.clone());
                }
            }
        }

        groups
    }

    fn decide(&self, groups: Groups) -> Option<Signal> {
        let basket = self.symbols.len() as f64;
        let fall_ratio = groups.fall.len() as f64 / basket;
        let rise_ratio = groups.rise.len() as f64 / basket;

        if fall_ratio >= self.settings.sell_threshold {
            tracing::info!(fall_ratio, "Broad fall, selling the basket");
            return Some(Signal::sell(self.symbols.clone()));
        }

        if rise_ratio >= self.settings.buy_threshold && !groups.other.is_empty() {
            tracing::info!(rise_ratio, laggards = ?groups.other, "Broad rise, buying laggards");
            return Some(Signal::buy(groups.other));
        }

        None
    }

    /// Consume samples until stopped or the price channel closes
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<Sample>,
        signals: mpsc::Sender<Signal>,
        mut stop: StopSignal,
    ) {
        tracing::info!(
            symbols = self.symbols.len(),
            window_len = self.settings.window_len,
            slide = self.settings.slide,
            "Oracle started"
        );

        loop {
            tokio::select! {
                _ = shutdown::stopped(&mut stop) => {
                    tracing::info!("Oracle stopped");
                    break;
                }
                sample = samples.recv() => {
                    let Some(sample) = sample else {
                        tracing::info!("Price channel closed, oracle exiting");
                        break;
                    };
                    if let Some(signal) = self.on_sample(&sample) {
                        emit(&signals, signal);
                    }
                }
            }
        }
    }
}

fn emit(signals: &mpsc::Sender<Signal>, signal: Signal) {
    match signals.try_send(signal) {
        Ok(()) => {}
        Err(TrySendError::Full(signal)) => {
            tracing::warn!(kind = %signal.kind, "Order channel full, dropping signal")
        }
        Err(TrySendError::Closed(signal)) => {
            tracing::warn!(kind = %signal.kind, "Order channel closed, dropping signal")
        }
    }
}
