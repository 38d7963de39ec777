// Risk limits applied by the trader
pub mod policy;

pub use policy::{BracketPrices, RiskPolicy, TradingWindow};
