// Price sampling, order execution and the helpers they share
pub mod balance;
pub mod executor;
pub mod price_feed;
pub mod quantizer;

pub use balance::{BalanceError, BalanceTracker};
pub use executor::{summarize_fills, Dispatch, FillSummary, TradeError, Trader};
pub use price_feed::PriceSampler;
pub use quantizer::{FilterExtra, QuantizeError, Quantizer};
