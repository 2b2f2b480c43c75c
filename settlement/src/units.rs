//! Fixed-point conversion between decimal amounts and chain base units
//!
//! Native coins use 18 decimals, tokens 6. Balances are held as integer base
//! units so repeated adjustments never drift; conversion fails instead of
//! rounding when an amount carries more precision than the asset allows.

use crate::{Error, Result};
use rust_decimal::Decimal;

/// Decimal amount to integer base units
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<i128> {
    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(Error::Validation(format!(
            "{} has more than {} decimal places",
            amount, decimals
        )));
    }

    let mut scaled = normalized;
    scaled.rescale(decimals);
    if scaled.scale() != decimals {
        return Err(Error::Validation(format!(
            "{} is too large for {} decimal places",
            amount, decimals
        )));
    }
    Ok(scaled.mantissa())
}

/// Integer base units to a decimal amount
pub fn from_base_units(units: i128, decimals: u32) -> Result<Decimal> {
    Decimal::try_from_i128_with_scale(units, decimals)
        .map(|d| d.normalize())
        .map_err(|e| Error::Validation(format!("{} base units out of range: {}", units, e)))
}
