//! Fixed-point money helpers
//!
//! Amounts travel as `Decimal` at the API boundary and are persisted as
//! integer ledger units so SQLite can compare and add them exactly.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::AppError;

/// Number of fractional digits a ledger unit represents.
pub const LEDGER_SCALE: u32 = 4;

/// Ledger units per currency unit.
const UNITS_PER_CURRENCY_UNIT: i64 = 10_000;

/// Convert a positive decimal amount to ledger units.
///
/// # Errors
/// Returns `Validation` if the amount is not positive, carries more than
/// `LEDGER_SCALE` fractional digits, or does not fit in i64 units.
pub fn amount_to_units(amount: Decimal) -> Result<i64, AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }

    if amount.normalize().scale() > LEDGER_SCALE {
        return Err(AppError::Validation(format!(
            "amount supports at most {} decimal places",
            LEDGER_SCALE
        )));
    }

    amount
        .checked_mul(Decimal::from(UNITS_PER_CURRENCY_UNIT))
        .and_then(|units| units.to_i64())
        .ok_or_else(|| AppError::Validation("amount is too large".to_string()))
}

/// Convert ledger units back to a decimal amount (scale 4, normalized).
pub fn units_to_amount(units: i64) -> Decimal {
    Decimal::new(units, LEDGER_SCALE).normalize()
}

/// Validate a currency code ("USD", "EUR", ...).
pub fn normalize_currency(currency: &str) -> Result<String, AppError> {
    let trimmed = currency.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(format!(
            "currency must be a 3-letter code, got {:?}",
            currency
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}
