// Trend detection over the symbol basket
pub mod epoch;
pub mod oracle;

pub use epoch::{Epoch, Recorded};
pub use oracle::{Groups, OracleSettings, TrendOracle};
