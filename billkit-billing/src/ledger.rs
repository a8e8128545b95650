//! Ledger primitives: pure line and total computation
//!
//! These functions are the single source of truth for every derived monetary
//! figure in the system. Totals are always recomputed fresh from the line
//! list; nothing in this crate patches a running total incrementally.

use crate::{Amount, BillingError, Result};
use rust_decimal::Decimal;

/// Per-line figures fed into [`aggregate_totals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineFigures {
    pub subtotal: Amount,
    pub tax: Amount,
}

/// Aggregated invoice-level totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    pub subtotal: Amount,
    pub tax_amount: Amount,
    pub total: Amount,
}

/// Compute a line subtotal: `quantity * unit_price - discount`.
///
/// # Errors
///
/// Fails with `BillingError::Validation` if quantity is zero or the discount
/// exceeds the gross line value (negative subtotal).
pub fn line_amount(quantity: u32, unit_price: Amount, discount: Amount) -> Result<Amount> {
    if quantity < 1 {
        return Err(
            BillingError::Validation("line quantity must be at least 1".to_string()).into(),
        );
    }
    let gross = unit_price.multiply(quantity);
    let net = gross
        .checked_sub(&discount)
        .ok_or_else(|| BillingError::Validation("line amount overflow".to_string()))?;
    if net.is_negative() {
        return Err(BillingError::Validation(format!(
            "discount {} exceeds line value {}",
            discount, gross
        ))
        .into());
    }
    Ok(net)
}

/// Compute tax on a subtotal at a percentage rate, rounded to the cent.
pub fn apply_tax(subtotal: Amount, rate_percent: Decimal) -> Amount {
    subtotal.percentage(rate_percent)
}

/// Derive invoice totals from the full line list.
///
/// Recomputation is authoritative: callers pass every line, every time.
/// Calling this twice over the same lines yields identical results.
pub fn aggregate_totals(lines: &[LineFigures]) -> LedgerTotals {
    let subtotal = lines
        .iter()
        .fold(Amount::zero(), |acc, l| acc.add(&l.subtotal));
    let tax_amount = lines.iter().fold(Amount::zero(), |acc, l| acc.add(&l.tax));
    LedgerTotals {
        subtotal,
        tax_amount,
        total: subtotal.add(&tax_amount),
    }
}
