// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod models;
pub mod pipeline;
pub mod risk;
pub mod shutdown;
pub mod strategy;

// Re-export commonly used types
pub use api::{BinanceClient, ExchangeClient, ExchangeError};
pub use config::BotConfig;
pub use models::*;
pub use pipeline::{Pipeline, PipelineHandle};

// Error handling
pub type Result<T> = anyhow::Result<T>;
