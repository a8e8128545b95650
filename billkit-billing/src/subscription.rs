//! Subscription lifecycle: records, plans, and the state machine
//!
//! A subscription moves forward-only through
//! `DRAFT -> CONFIRMED -> ACTIVE -> CLOSED`, with `QUOTATION` as an alternate
//! entry state for quotation-originated records. Every transition appends
//! exactly one history entry; history is the audit trail of the state
//! machine's execution and is never edited or deleted.

use crate::{ledger, Amount, BillingError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a payment link stays valid after order creation.
pub const PAYMENT_LINK_VALIDITY_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Quotation,
    Draft,
    Confirmed,
    Active,
    Closed,
}

impl SubscriptionStatus {
    /// Forward-only transition table.
    pub fn can_transition(self, to: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, to),
            (Quotation, Draft) | (Quotation, Confirmed) | (Draft, Confirmed) | (Confirmed, Active) | (Active, Closed)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubscriptionStatus::Quotation => "QUOTATION",
            SubscriptionStatus::Draft => "DRAFT",
            SubscriptionStatus::Confirmed => "CONFIRMED",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingPeriod {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BillingPeriod {
    /// Nominal period length. Months and years are approximate.
    pub fn duration(&self) -> Duration {
        match self {
            BillingPeriod::Daily => Duration::days(1),
            BillingPeriod::Weekly => Duration::weeks(1),
            BillingPeriod::Monthly => Duration::days(30),
            BillingPeriod::Yearly => Duration::days(365),
        }
    }
}

/// A recurring plan with behavioral policy flags.
///
/// The flags gate which lifecycle transitions are legal for subscriptions on
/// this plan; they do not trigger anything by themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringPlan {
    pub id: Uuid,
    pub name: String,
    pub price: Amount,
    pub billing_period: BillingPeriod,
    pub min_quantity: u32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub auto_close: bool,
    pub closable: bool,
    pub pausable: bool,
    pub renewable: bool,
}

impl RecurringPlan {
    pub fn new(name: impl Into<String>, price: Amount, billing_period: BillingPeriod) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            price,
            billing_period,
            min_quantity: 1,
            valid_from: None,
            valid_until: None,
            auto_close: false,
            closable: true,
            pausable: false,
            renewable: true,
        }
    }

    pub fn with_flags(
        mut self,
        auto_close: bool,
        closable: bool,
        pausable: bool,
        renewable: bool,
    ) -> Self {
        self.auto_close = auto_close;
        self.closable = closable;
        self.pausable = pausable;
        self.renewable = renewable;
        self
    }
}

/// A product line on a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionLine {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Amount,
    pub discount: Amount,
    /// Tax rate applied to this line, if any.
    pub tax_rate: Option<Decimal>,
    /// `quantity * unit_price - discount + tax share`.
    pub amount: Amount,
}

impl SubscriptionLine {
    /// Build a line, deriving `amount` through the ledger.
    pub fn new(
        description: impl Into<String>,
        quantity: u32,
        unit_price: Amount,
        discount: Amount,
        tax_rate: Option<Decimal>,
    ) -> Result<Self> {
        let subtotal = ledger::line_amount(quantity, unit_price, discount)?;
        let tax = tax_rate
            .map(|rate| ledger::apply_tax(subtotal, rate))
            .unwrap_or_else(Amount::zero);
        Ok(Self {
            id: Uuid::new_v4(),
            product_id: None,
            description: description.into(),
            quantity,
            unit_price,
            discount,
            tax_rate,
            amount: subtotal.add(&tax),
        })
    }

    pub fn with_product(mut self, product_id: Uuid) -> Self {
        self.product_id = Some(product_id);
        self
    }

    /// Line value before tax.
    pub fn subtotal(&self) -> Result<Amount> {
        ledger::line_amount(self.quantity, self.unit_price, self.discount)
    }
}

/// Append-only audit entry written on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub from_status: SubscriptionStatus,
    pub to_status: SubscriptionStatus,
    pub description: String,
    pub performed_by: String,
    pub at: DateTime<Utc>,
}

/// A recurring billing relationship between a customer and a plan/product set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    /// Human-readable number: `SUB-NNNNNN`, or a quotation-derived suffix.
    pub number: String,
    pub customer_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub plan: Option<RecurringPlan>,
    pub status: SubscriptionStatus,
    pub recurring_total: Amount,
    pub discount_code: Option<String>,
    pub discount_amount: Amount,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub amount_due: Amount,
    pub payment_link_expires_at: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub next_invoice_date: Option<DateTime<Utc>>,
    pub lines: Vec<SubscriptionLine>,
    history: Vec<HistoryEntry>,
}

impl Subscription {
    pub fn new(number: impl Into<String>, customer_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            customer_id,
            contact_id: None,
            plan: None,
            status: SubscriptionStatus::Draft,
            recurring_total: Amount::zero(),
            discount_code: None,
            discount_amount: Amount::zero(),
            gateway_order_id: None,
            gateway_payment_id: None,
            amount_due: Amount::zero(),
            payment_link_expires_at: None,
            start_date: Utc::now(),
            expiration_date: None,
            next_invoice_date: None,
            lines: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Quotation-originated entry point: starts at `QUOTATION` with a
    /// timestamp-derived number instead of consuming the sequence.
    pub fn from_quotation(customer_id: Uuid, created_at: DateTime<Utc>) -> Self {
        let mut sub = Self::new(Self::quotation_number(created_at), customer_id);
        sub.status = SubscriptionStatus::Quotation;
        sub
    }

    /// `SUB-Q` + base36 of the creation timestamp.
    pub fn quotation_number(created_at: DateTime<Utc>) -> String {
        let mut n = created_at.timestamp().max(0) as u64;
        let digits = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut out = Vec::new();
        loop {
            out.push(digits[(n % 36) as usize]);
            n /= 36;
            if n == 0 {
                break;
            }
        }
        out.reverse();
        format!("SUB-Q{}", String::from_utf8(out).unwrap_or_default())
    }

    pub fn with_plan(mut self, plan: RecurringPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_contact(mut self, contact_id: Uuid) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn with_line(mut self, line: SubscriptionLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = start_date;
        self
    }

    pub fn with_expiration_date(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    /// Sum of line subtotals, or the plan price when there are no lines.
    pub fn charge_subtotal(&self) -> Result<Amount> {
        if self.lines.is_empty() {
            return match &self.plan {
                Some(plan) => Ok(plan.price),
                None => Err(BillingError::Validation(format!(
                    "subscription {} has neither lines nor a plan",
                    self.number
                ))
                .into()),
            };
        }
        let mut total = Amount::zero();
        for line in &self.lines {
            total = total.add(&line.subtotal()?);
        }
        Ok(total)
    }

    /// Total item count across lines (1 for plan-only subscriptions).
    pub fn total_quantity(&self) -> u32 {
        if self.lines.is_empty() {
            1
        } else {
            self.lines.iter().map(|l| l.quantity).sum()
        }
    }

    /// Ordered, append-only audit trail.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Perform a state transition, appending exactly one history entry.
    ///
    /// # Errors
    ///
    /// `BillingError::InvalidState` if the transition is not in the allowed
    /// table. State is left unchanged on failure.
    pub fn transition(
        &mut self,
        to: SubscriptionStatus,
        action: impl Into<String>,
        description: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(BillingError::InvalidState(format!(
                "subscription {} cannot move from {} to {}",
                self.number, self.status, to
            ))
            .into());
        }
        self.history.push(HistoryEntry {
            action: action.into(),
            from_status: self.status,
            to_status: to,
            description: description.into(),
            performed_by: performed_by.into(),
            at: Utc::now(),
        });
        self.status = to;
        Ok(())
    }

    /// DRAFT -> CONFIRMED on order creation: records the gateway order, the
    /// amount due, and the payment-link expiry.
    pub fn confirm_order(
        &mut self,
        order_id: impl Into<String>,
        amount_due: Amount,
        performed_by: impl Into<String>,
    ) -> Result<()> {
        let order_id = order_id.into();
        self.transition(
            SubscriptionStatus::Confirmed,
            "payment_order_created",
            format!("gateway order {} for {}", order_id, amount_due),
            performed_by,
        )?;
        self.gateway_order_id = Some(order_id);
        self.amount_due = amount_due;
        self.payment_link_expires_at =
            Some(Utc::now() + Duration::hours(PAYMENT_LINK_VALIDITY_HOURS));
        Ok(())
    }

    /// CONFIRMED -> ACTIVE on a verified payment: clears the due amount.
    pub fn activate(
        &mut self,
        payment_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Result<()> {
        let payment_id = payment_id.into();
        self.transition(
            SubscriptionStatus::Active,
            "payment_verified",
            format!("gateway payment {} verified", payment_id),
            performed_by,
        )?;
        self.gateway_payment_id = Some(payment_id);
        self.amount_due = Amount::zero();
        Ok(())
    }

    /// ACTIVE -> CLOSED, gated by the plan's `closable` flag.
    ///
    /// # Errors
    ///
    /// `BillingError::PolicyViolation` when the plan forbids closing;
    /// `BillingError::InvalidState` when not currently active.
    pub fn close(&mut self, performed_by: impl Into<String>) -> Result<()> {
        if let Some(plan) = &self.plan {
            if !plan.closable {
                return Err(BillingError::PolicyViolation(format!(
                    "plan {} does not permit closing",
                    plan.name
                ))
                .into());
            }
        }
        self.transition(
            SubscriptionStatus::Closed,
            "closed",
            "subscription closed",
            performed_by,
        )?;
        self.amount_due = Amount::zero();
        Ok(())
    }

    /// Whether the checkout payment link has lapsed.
    pub fn is_payment_link_expired(&self, now: DateTime<Utc>) -> bool {
        self.payment_link_expires_at
            .is_some_and(|expires_at| now > expires_at)
    }

    /// Whether a renewal invoice is due.
    pub fn is_invoice_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.next_invoice_date.is_some_and(|due| due <= now)
    }
}
