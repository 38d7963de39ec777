use anyhow::Context;
use basketbot::config::{BotConfig, DEFAULT_CONFIG_PATH};
use basketbot::{shutdown, BinanceClient, Pipeline};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "basketbot=info";

/// Basket trend-following trading bot
#[derive(Debug, Parser)]
#[command(name = "basketbot", version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Detect and log signals without placing orders
    #[arg(long)]
    dry_run: bool,

    /// Tracing filter, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.log_filter.as_deref());

    let mut config = BotConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    config.apply_overrides(args.dry_run);
    config.validate()?;

    tracing::info!(
        policy = %config.policy.name,
        exchange = %config.exchange.name,
        testnet = config.policy.testnet,
        dry_run = config.policy.dryrun,
        symbols = ?config.policy.symbols,
        window_len = config.window_len(),
        "basketbot starting"
    );

    let client = BinanceClient::new(
        config.base_url(),
        config.exchange.api_key.clone(),
        config.exchange.secret_key.clone(),
        config.exchange.requests_per_second,
    )?;
    let pipeline = Pipeline::build(config, Arc::new(client)).await?;

    let (stop_tx, stop_rx) = shutdown::channel();
    let handle = pipeline.start(stop_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C, shutting down...");

    // in-flight orders are not awaited
    let _ = stop_tx.send(true);
    handle.wait_until_completion().await?;

    tracing::info!("basketbot stopped");
    Ok(())
}

fn setup_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
