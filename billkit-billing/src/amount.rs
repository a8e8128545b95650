//! Safe monetary arithmetic using fixed-point decimal
//!
//! This module provides a type-safe `Amount` using rust_decimal.
//! **NEVER use f64 for financial calculations!**
//!
//! All customer-facing amounts carry two decimal places; rounding is always
//! to the nearest cent, half away from zero. Gateway amounts are expressed in
//! minor currency units (paise) via [`Amount::to_minor_units`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monetary amount with fixed-point precision.
///
/// # Security
///
/// - Uses `Decimal` internally (28-29 significant digits)
/// - Checked arithmetic, no silent overflow
/// - Serializes as string (preserves precision)
///
/// # Examples
///
/// ```rust
/// use billkit_billing::Amount;
///
/// let price = Amount::from_major(500);
/// let total = price.multiply(2);
/// assert_eq!(total, Amount::from_major(1000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    /// Create from whole currency units (rupees).
    pub fn from_major(units: i64) -> Self {
        Self {
            value: Decimal::from(units),
        }
    }

    /// Create from a raw decimal value.
    pub fn from_decimal(value: Decimal) -> Self {
        Self { value }
    }

    /// Create from a decimal string (e.g., "123.45").
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as a valid decimal.
    pub fn from_str_checked(s: &str) -> Result<Self, String> {
        Decimal::from_str(s)
            .map(|value| Self { value })
            .map_err(|e| format!("Invalid amount: {}", e))
    }

    /// Zero amount.
    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
        }
    }

    /// Check if amount is zero.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Check if amount is strictly negative.
    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    /// Get the internal `Decimal` value.
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    /// Checked addition (returns None on overflow).
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_add(other.value)
            .map(|value| Self { value })
    }

    /// Checked subtraction (returns None on overflow).
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        self.value
            .checked_sub(other.value)
            .map(|value| Self { value })
    }

    /// Add two amounts. Returns zero if overflow occurs.
    pub fn add(&self, other: &Self) -> Self {
        self.checked_add(other).unwrap_or_else(Self::zero)
    }

    /// Subtract an amount, clamping at zero.
    ///
    /// Balances and dues never go negative in this system; subtraction past
    /// zero yields zero.
    pub fn subtract(&self, other: &Self) -> Self {
        self.checked_sub(other)
            .filter(|r| r.value >= Decimal::ZERO)
            .unwrap_or_else(Self::zero)
    }

    /// Multiply by a quantity.
    pub fn multiply(&self, quantity: u32) -> Self {
        self.value
            .checked_mul(Decimal::from(quantity))
            .map(|value| Self { value })
            .unwrap_or_else(|| Self {
                value: Decimal::MAX,
            })
    }

    /// Calculate a percentage of this amount, rounded to the cent.
    ///
    /// Rounding is half-away-from-zero, matching how the rest of the ledger
    /// rounds.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use billkit_billing::Amount;
    /// use rust_decimal_macros::dec;
    ///
    /// let subtotal = Amount::from_major(900);
    /// let gst = subtotal.percentage(dec!(18));
    /// assert_eq!(gst, Amount::from_major(162));
    /// ```
    pub fn percentage(&self, rate: Decimal) -> Self {
        let rate_fraction = rate
            .checked_div(Decimal::from(100))
            .unwrap_or(Decimal::ZERO);
        self.value
            .checked_mul(rate_fraction)
            .map(|value| Self {
                value: value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            })
            .unwrap_or_else(Self::zero)
    }

    /// Round to two decimal places, half away from zero.
    pub fn round_cents(&self) -> Self {
        Self {
            value: self
                .value
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        }
    }

    /// Smaller of two amounts.
    pub fn min(&self, other: &Self) -> Self {
        if self.value <= other.value {
            *self
        } else {
            *other
        }
    }

    /// Convert to minor currency units (paise): `round(amount * 100)`.
    ///
    /// Gateways take integer minor units; values past i64 saturate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use billkit_billing::Amount;
    ///
    /// let total = Amount::from_str_checked("1062.00").unwrap();
    /// assert_eq!(total.to_minor_units(), 106200);
    /// ```
    pub fn to_minor_units(&self) -> i64 {
        self.value
            .checked_mul(Decimal::from(100))
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_i64())
            .unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_creation() {
        let amt = Amount::from_major(1000);
        assert_eq!(amt.as_decimal(), Decimal::from(1000));

        let amt2 = Amount::from_str_checked("1000").unwrap();
        assert_eq!(amt, amt2);
    }

    #[test]
    fn test_arithmetic() {
        let a = Amount::from_major(1000);
        let b = Amount::from_major(500);

        assert_eq!(a.add(&b), Amount::from_major(1500));
        assert_eq!(a.subtract(&b), Amount::from_major(500));
        assert_eq!(b.multiply(3), Amount::from_major(1500));
    }

    #[test]
    fn test_subtract_clamps_at_zero() {
        let a = Amount::from_major(100);
        let b = Amount::from_major(250);
        assert_eq!(a.subtract(&b), Amount::zero());
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        // 10.125 * 10% = 1.0125 -> 1.01; 10.15 * 10% = 1.015 -> 1.02
        let a = Amount::from_str_checked("10.125").unwrap();
        assert_eq!(a.percentage(dec!(10)), Amount::from_str_checked("1.01").unwrap());

        let b = Amount::from_str_checked("10.15").unwrap();
        assert_eq!(b.percentage(dec!(10)), Amount::from_str_checked("1.02").unwrap());
    }

    #[test]
    fn test_gst_scenario() {
        let payable = Amount::from_major(900);
        let gst = payable.percentage(dec!(18));
        assert_eq!(gst, Amount::from_major(162));
        assert_eq!(payable.add(&gst).to_minor_units(), 106200);
    }

    #[test]
    fn test_minor_units_rounds() {
        let a = Amount::from_str_checked("10.555").unwrap();
        assert_eq!(a.to_minor_units(), 1056);
        assert_eq!(Amount::zero().to_minor_units(), 0);
    }

    #[test]
    fn test_min() {
        let a = Amount::from_major(100);
        let b = Amount::from_major(50);
        assert_eq!(Amount::min(&a, &b), b);
        assert_eq!(Amount::min(&b, &a), b);
    }

    #[test]
    fn test_serialization_round_trip() {
        let amt = Amount::from_str_checked("123.45").unwrap();
        let json = serde_json::to_string(&amt).unwrap();
        let parsed: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amt, parsed);
    }

    #[test]
    fn test_display() {
        let amt = Amount::from_str_checked("123.45").unwrap();
        assert_eq!(amt.to_string(), "123.45");
    }
}
