use crate::api::SymbolFilters;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantizeError {
    #[error("No filters known for symbol {0}")]
    UnknownSymbol(String),

    #[error("Cannot normalize non-positive value {value} for {symbol}")]
    NonPositive { symbol: String, value: f64 },

    #[error("Value {value} for {symbol} is out of range")]
    OutOfRange { symbol: String, value: f64 },

    #[error("Invalid {field} {value:?} for {symbol}")]
    InvalidFilter {
        symbol: String,
        field: &'static str,
        value: String,
    },
}

/// Normalization parameters derived once from a symbol's exchange filters
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExtra {
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub step_size: Decimal,
    pub min_qty_inverse: Decimal,
    pub qty_precision: u32,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
    pub min_price_inverse: Decimal,
    pub price_precision: u32,
}

impl FilterExtra {
    pub fn from_filters(filters: &SymbolFilters) -> Result<Self, QuantizeError> {
        let symbol = filters.symbol.as_str();

        let min_qty = parse_filter(symbol, "minQty", &filters.min_qty, true)?;
        let min_price = parse_filter(symbol, "minPrice", &filters.min_price, true)?;

        Ok(Self {
            min_qty,
            max_qty: parse_filter(symbol, "maxQty", &filters.max_qty, false)?,
            step_size: parse_filter(symbol, "stepSize", &filters.step_size, false)?,
            min_qty_inverse: inverse(symbol, "minQty", min_qty)?,
            qty_precision: min_qty.normalize().scale(),
            min_price,
            max_price: parse_filter(symbol, "maxPrice", &filters.max_price, false)?,
            tick_size: parse_filter(symbol, "tickSize", &filters.tick_size, false)?,
            min_price_inverse: inverse(symbol, "minPrice", min_price)?,
            price_precision: min_price.normalize().scale(),
        })
    }
}

fn parse_filter(
    symbol: &str,
    field: &'static str,
    value: &str,
    must_be_positive: bool,
) -> Result<Decimal, QuantizeError> {
    let invalid = || QuantizeError::InvalidFilter {
        symbol: symbol.to_string(),
        field,
        value: value.to_string(),
    };

    let parsed = Decimal::from_str(value.trim()).map_err(|_| invalid())?;
    if parsed.is_sign_negative() || (must_be_positive && parsed.is_zero()) {
        return Err(invalid());
    }
    Ok(parsed)
}

fn inverse(symbol: &str, field: &'static str, value: Decimal) -> Result<Decimal, QuantizeError> {
    Decimal::ONE
        .checked_div(value)
        .ok_or_else(|| QuantizeError::InvalidFilter {
            symbol: symbol.to_string(),
            field,
            value: value.to_string(),
        })
}

/// Truncates raw quantities and prices onto each symbol's legal grid.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Quantizer {
    extras: HashMap<String, FilterExtra>,
}

impl Quantizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_filters<'a>(
        filters: impl IntoIterator<Item = &'a SymbolFilters>,
    ) -> Result<Self, QuantizeError> {
        let mut quantizer = Self::new();
        for f in filters {
            let extra = FilterExtra::from_filters(f)?;
            tracing::debug!(symbol = %f.symbol, ?extra, "Derived filter extra");
            quantizer.insert(f.symbol.clone(), extra);
        }
        Ok(quantizer)
    }

    pub fn insert(&mut self, symbol: String, extra: FilterExtra) {
        self.extras.insert(symbol, extra);
    }

    pub fn extra(&self, symbol: &str) -> Option<&FilterExtra> {
        self.extras.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.extras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extras.is_empty()
    }

    pub fn try_normalize_quantity(&self, symbol: &str, raw: f64) -> Result<String, QuantizeError> {
        let extra = self
            .extra(symbol)
            .ok_or_else(|| QuantizeError::UnknownSymbol(symbol.to_string()))?;
        truncate(
            symbol,
            raw,
            extra.min_qty,
            extra.min_qty_inverse,
            extra.qty_precision,
        )
    }

    pub fn try_normalize_price(&self, symbol: &str, raw: f64) -> Result<String, QuantizeError> {
        let extra = self
            .extra(symbol)
            .ok_or_else(|| QuantizeError::UnknownSymbol(symbol.to_string()))?;
        truncate(
            symbol,
            raw,
            extra.min_price,
            extra.min_price_inverse,
            extra.price_precision,
        )
    }

    /// Quantity as an exchange-legal string.
    ///
    /// Aborts the process on an unknown symbol or a non-positive value.
    /// Both mean the configuration or the calling code is wrong.
    pub fn normalize_quantity(&self, symbol: &str, raw: f64) -> String {
        match self.try_normalize_quantity(symbol, raw) {
            Ok(value) => value,
            Err(e) => fatal(e),
        }
    }

    /// Price as an exchange-legal string.
    ///
    /// Aborts under the same conditions as [`Quantizer::normalize_quantity`].
    pub fn normalize_price(&self, symbol: &str, raw: f64) -> String {
        match self.try_normalize_price(symbol, raw) {
            Ok(value) => value,
            Err(e) => fatal(e),
        }
    }
}

// A panic would only end the spawned order task, not the process
fn fatal(err: QuantizeError) -> ! {
    tracing::error!(error = %err, "Quantizer misuse, aborting");
    std::process::abort()
}

fn truncate(
    symbol: &str,
    raw: f64,
    step: Decimal,
    inverse: Decimal,
    precision: u32,
) -> Result<String, QuantizeError> {
    if !raw.is_finite() || raw <= 0.0 {
        return Err(QuantizeError::NonPositive {
            symbol: symbol.to_string(),
            value: raw,
        });
    }

    let out_of_range = || QuantizeError::OutOfRange {
        symbol: symbol.to_string(),
        value: raw,
    };

    // f64 Display is the shortest round-trip form, so 0.29 stays 0.29
    let value = Decimal::from_str(&raw.to_string()).map_err(|_| out_of_range())?;
    let steps = value.checked_mul(inverse).ok_or_else(out_of_range)?.trunc();
    let truncated = steps.checked_mul(step).ok_or_else(out_of_range)?;

    Ok(format!("{:.*}", precision as usize, truncated))
}
