use crate::api::{AssetBalance, ExchangeClient, ExchangeError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("Asset {0} not found in account")]
    AssetNotFound(String),

    #[error("Unparseable {field} balance {value:?} for {asset}")]
    Parse {
        asset: String,
        field: &'static str,
        value: String,
    },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Reads balances straight from the exchange.
///
/// Nothing is cached: every call fetches a fresh account snapshot.
#[derive(Clone)]
pub struct BalanceTracker {
    client: Arc<dyn ExchangeClient>,
}

impl BalanceTracker {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    /// Account snapshot without the zero-balance assets
    pub async fn get_account(&self) -> Result<Vec<AssetBalance>, BalanceError> {
        let snapshot = self.client.account_snapshot().await?;
        let total = snapshot.len();

        let held: Vec<AssetBalance> = snapshot.into_iter().filter(is_held).collect();

        tracing::debug!(total, held = held.len(), "Fetched account snapshot");
        Ok(held)
    }

    /// Free and locked amount of one asset
    pub async fn get_balance(&self, asset: &str) -> Result<(f64, f64), BalanceError> {
        let snapshot = self.client.account_snapshot().await?;

        let line = snapshot
            .into_iter()
            .find(|b| b.asset == asset)
            .ok_or_else(|| BalanceError::AssetNotFound(asset.to_string()))?;

        let free = parse_amount(&line.asset, "free", &line.free)?;
        let locked = parse_amount(&line.asset, "locked", &line.locked)?;
        Ok((free, locked))
    }

    /// Every asset's free + locked amount.
    ///
    /// An asset with an unparseable amount is logged and left out.
    pub async fn get_balance_map(&self) -> Result<HashMap<String, f64>, BalanceError> {
        let snapshot = self.client.account_snapshot().await?;
        let mut balances = HashMap::with_capacity(snapshot.len());

        for line in snapshot {
            let total = parse_amount(&line.asset, "free", &line.free).and_then(|free| {
                parse_amount(&line.asset, "locked", &line.locked).map(|locked| free + locked)
            });

            match total {
                Ok(total) => {
                    balances.insert(line.asset, total);
                }
                Err(e) => tracing::warn!("Skipping asset in balance map: {}", e),
            }
        }

        Ok(balances)
    }
}

fn parse_amount(asset: &str, field: &'static str, value: &str) -> Result<f64, BalanceError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BalanceError::Parse {
            asset: asset.to_string(),
            field,
            value: value.to_string(),
        })
}

fn is_held(balance: &AssetBalance) -> bool {
    let amount = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    amount(&balance.free) != 0.0 || amount(&balance.locked) != 0.0
}
