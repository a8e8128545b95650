//! Discount codes: validity rules and price evaluation
//!
//! Evaluation is pure; redeeming a code (the `usage_count` increment) is an
//! atomic store operation, see [`crate::storage::BillingStore::redeem_discount`].

use crate::{Amount, BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    /// `value` is a percentage of the purchase subtotal.
    Percentage,
    /// `value` is a flat currency amount.
    Fixed,
}

/// A named, rule-gated price reduction.
///
/// The `code` doubles as the redemption code and matches case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub min_purchase: Option<Amount>,
    pub min_quantity: Option<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub limit_usage: Option<u32>,
    pub usage_count: u32,
}

/// The purchase being priced against a discount code.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseContext {
    pub subtotal: Amount,
    pub quantity: u32,
    pub reference_date: DateTime<Utc>,
}

impl Discount {
    pub fn new(code: impl Into<String>, kind: DiscountKind, value: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            kind,
            value,
            min_purchase: None,
            min_quantity: None,
            starts_at: None,
            ends_at: None,
            limit_usage: None,
            usage_count: 0,
        }
    }

    pub fn with_min_purchase(mut self, min: Amount) -> Self {
        self.min_purchase = Some(min);
        self
    }

    pub fn with_min_quantity(mut self, min: u32) -> Self {
        self.min_quantity = Some(min);
        self
    }

    pub fn with_window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }

    pub fn with_limit_usage(mut self, limit: u32) -> Self {
        self.limit_usage = Some(limit);
        self
    }

    /// Case-insensitive code match.
    pub fn matches_code(&self, code: &str) -> bool {
        self.code.eq_ignore_ascii_case(code)
    }

    /// True while the usage limit (if any) has headroom.
    pub fn has_remaining_usage(&self) -> bool {
        self.limit_usage.is_none_or(|limit| self.usage_count < limit)
    }

    /// Check every validity rule against the purchase context.
    ///
    /// # Errors
    ///
    /// `BillingError::PolicyViolation` naming the first failed rule.
    pub fn check_validity(&self, ctx: &PurchaseContext) -> Result<()> {
        if let Some(starts_at) = self.starts_at {
            if ctx.reference_date < starts_at {
                return Err(BillingError::PolicyViolation(format!(
                    "discount {} is not active until {}",
                    self.code, starts_at
                ))
                .into());
            }
        }
        if let Some(ends_at) = self.ends_at {
            if ctx.reference_date > ends_at {
                return Err(BillingError::PolicyViolation(format!(
                    "discount {} expired on {}",
                    self.code, ends_at
                ))
                .into());
            }
        }
        if !self.has_remaining_usage() {
            return Err(BillingError::PolicyViolation(format!(
                "discount {} usage limit reached",
                self.code
            ))
            .into());
        }
        if let Some(min_purchase) = self.min_purchase {
            if ctx.subtotal < min_purchase {
                return Err(BillingError::PolicyViolation(format!(
                    "discount {} requires a minimum purchase of {}",
                    self.code, min_purchase
                ))
                .into());
            }
        }
        if let Some(min_quantity) = self.min_quantity {
            if ctx.quantity < min_quantity {
                return Err(BillingError::PolicyViolation(format!(
                    "discount {} requires at least {} items",
                    self.code, min_quantity
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Evaluate the discount amount for a purchase.
    ///
    /// The result is rounded to the cent and clamped to `[0, subtotal]`:
    /// a discount never goes negative and never exceeds the purchase.
    pub fn evaluate(&self, ctx: &PurchaseContext) -> Result<Amount> {
        self.check_validity(ctx)?;

        let raw = match self.kind {
            DiscountKind::Percentage => ctx.subtotal.percentage(self.value),
            DiscountKind::Fixed => Amount::from_decimal(self.value).round_cents(),
        };
        if raw.is_negative() {
            return Ok(Amount::zero());
        }
        Ok(Amount::min(&raw, &ctx.subtotal))
    }
}
