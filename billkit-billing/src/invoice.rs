//! Invoice engine: line snapshots, status-gated mutation, payment application
//!
//! Lines are only mutable while an invoice is DRAFT; every mutation ends in a
//! full recomputation of the totals from the current line list. Recording a
//! payment is the only path from CONFIRMED to PAID.

use crate::subscription::Subscription;
use crate::{ledger, Amount, BillingError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default payment term: due date and renewal advance.
pub const PAYMENT_TERM_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Draft,
    Confirmed,
    Paid,
    Cancelled,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Confirmed => "CONFIRMED",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Gateway,
    BankTransfer,
    Card,
    Upi,
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
}

/// A payment recorded against an invoice.
///
/// Payments reference their invoice but have an independent lifecycle for
/// refund/audit trails; the invoice does not own them for deletion purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub customer_id: Uuid,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub state: PaymentState,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl Payment {
    pub fn completed(
        invoice_id: Uuid,
        customer_id: Uuid,
        amount: Amount,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            customer_id,
            amount,
            method,
            state: PaymentState::Completed,
            paid_at: Utc::now(),
            reference,
            notes: None,
        }
    }
}

/// A billed line on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Amount,
    pub discount: Amount,
    /// Rate snapshot taken when the line was created, not a live reference.
    pub tax_rate: Option<Decimal>,
    pub tax_amount: Amount,
    /// `quantity * unit_price - discount + tax_amount`.
    pub amount: Amount,
}

impl InvoiceLine {
    /// Build a line, deriving tax and amount through the ledger.
    pub fn new(
        description: impl Into<String>,
        quantity: u32,
        unit_price: Amount,
        discount: Amount,
        tax_rate: Option<Decimal>,
    ) -> Result<Self> {
        let subtotal = ledger::line_amount(quantity, unit_price, discount)?;
        let tax_amount = tax_rate
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
            tax_amount,
            amount: subtotal.add(&tax_amount),
        })
    }

    pub fn with_product(mut self, product_id: Uuid) -> Self {
        self.product_id = Some(product_id);
        self
    }

    fn figures(&self) -> Result<ledger::LineFigures> {
        let subtotal = ledger::line_amount(self.quantity, self.unit_price, self.discount)?;
        let tax = self
            .tax_rate
            .map(|rate| ledger::apply_tax(subtotal, rate))
            .unwrap_or_else(Amount::zero);
        Ok(ledger::LineFigures { subtotal, tax })
    }
}

/// A billing document with its own DRAFT/CONFIRMED/PAID/CANCELLED lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// `INV-NNNNNN`.
    pub number: String,
    pub customer_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub status: InvoiceStatus,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub subtotal: Amount,
    pub tax_amount: Amount,
    pub total_amount: Amount,
    pub paid_amount: Amount,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
}

impl Invoice {
    pub fn new(number: impl Into<String>, customer_id: Uuid) -> Self {
        let issue_date = Utc::now();
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            customer_id,
            contact_id: None,
            subscription_id: None,
            status: InvoiceStatus::Draft,
            issue_date,
            due_date: issue_date + Duration::days(PAYMENT_TERM_DAYS),
            notes: None,
            subtotal: Amount::zero(),
            tax_amount: Amount::zero(),
            total_amount: Amount::zero(),
            paid_amount: Amount::zero(),
            lines: Vec::new(),
            payments: Vec::new(),
        }
    }

    fn ensure_draft(&self, operation: &str) -> Result<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(BillingError::InvalidState(format!(
                "cannot {} on invoice {} in status {}",
                operation, self.number, self.status
            ))
            .into());
        }
        Ok(())
    }

    /// Add a line. DRAFT only; totals are recomputed afterwards.
    pub fn add_line(&mut self, line: InvoiceLine) -> Result<()> {
        self.ensure_draft("add line")?;
        self.lines.push(line);
        self.recalculate_totals()
    }

    /// Remove a line by id. DRAFT only; totals are recomputed afterwards.
    pub fn remove_line(&mut self, line_id: Uuid) -> Result<()> {
        self.ensure_draft("remove line")?;
        let before = self.lines.len();
        self.lines.retain(|l| l.id != line_id);
        if self.lines.len() == before {
            return Err(
                BillingError::NotFound(format!("invoice line {} not found", line_id)).into(),
            );
        }
        self.recalculate_totals()
    }

    /// Edit notes. DRAFT only.
    pub fn set_notes(&mut self, notes: impl Into<String>) -> Result<()> {
        self.ensure_draft("edit notes")?;
        self.notes = Some(notes.into());
        Ok(())
    }

    /// Move the due date. DRAFT only.
    pub fn set_due_date(&mut self, due_date: DateTime<Utc>) -> Result<()> {
        self.ensure_draft("edit due date")?;
        self.due_date = due_date;
        Ok(())
    }

    /// Recompute subtotal/tax/total from the current line list.
    ///
    /// Per-line figures are re-derived from the raw quantity/price/discount
    /// fields, never read back from stored running totals.
    pub fn recalculate_totals(&mut self) -> Result<()> {
        let mut figures = Vec::with_capacity(self.lines.len());
        for line in &mut self.lines {
            let f = line.figures()?;
            line.tax_amount = f.tax;
            line.amount = f.subtotal.add(&f.tax);
            figures.push(f);
        }
        let totals = ledger::aggregate_totals(&figures);
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        self.total_amount = totals.total;
        Ok(())
    }

    /// DRAFT -> CONFIRMED.
    pub fn confirm(&mut self) -> Result<()> {
        self.ensure_draft("confirm")?;
        self.status = InvoiceStatus::Confirmed;
        Ok(())
    }

    /// DRAFT or CONFIRMED -> CANCELLED.
    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            InvoiceStatus::Draft | InvoiceStatus::Confirmed => {
                self.status = InvoiceStatus::Cancelled;
                Ok(())
            }
            _ => Err(BillingError::InvalidState(format!(
                "cannot cancel invoice {} in status {}",
                self.number, self.status
            ))
            .into()),
        }
    }

    /// Outstanding balance.
    pub fn remaining_balance(&self) -> Amount {
        self.total_amount.subtract(&self.paid_amount)
    }

    /// Apply a payment amount against the balance.
    ///
    /// Flips to PAID exactly when the remaining balance reaches zero.
    ///
    /// # Errors
    ///
    /// - `BillingError::Validation` for non-positive amounts
    /// - `BillingError::InvalidState` unless CONFIRMED (or already PAID)
    /// - `BillingError::Overpayment` when the amount exceeds the balance
    pub fn apply_payment(&mut self, amount: Amount) -> Result<()> {
        if amount.is_zero() || amount.is_negative() {
            return Err(
                BillingError::Validation("payment amount must be positive".to_string()).into(),
            );
        }
        match self.status {
            InvoiceStatus::Confirmed | InvoiceStatus::Paid => {}
            _ => {
                return Err(BillingError::InvalidState(format!(
                    "cannot record payment on invoice {} in status {}",
                    self.number, self.status
                ))
                .into());
            }
        }
        let remaining = self.remaining_balance();
        if amount > remaining {
            return Err(BillingError::Overpayment { amount, remaining }.into());
        }
        self.paid_amount = self.paid_amount.add(&amount);
        if self.remaining_balance().is_zero() {
            self.status = InvoiceStatus::Paid;
        }
        Ok(())
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

/// Snapshot a subscription into a DRAFT renewal invoice and advance its
/// `next_invoice_date` by the same payment term.
///
/// Each subscription line is copied (quantity, unit price, discount) with the
/// tax recomputed from the line's rate at snapshot time. Plan-only
/// subscriptions get a single plan line.
pub fn generate_from_subscription(
    sub: &mut Subscription,
    number: impl Into<String>,
    issued_at: DateTime<Utc>,
) -> Result<Invoice> {
    let mut invoice = Invoice::new(number, sub.customer_id);
    invoice.contact_id = sub.contact_id;
    invoice.subscription_id = Some(sub.id);
    invoice.issue_date = issued_at;
    invoice.due_date = issued_at + Duration::days(PAYMENT_TERM_DAYS);

    if sub.lines.is_empty() {
        let plan = sub.plan.as_ref().ok_or_else(|| {
            BillingError::Validation(format!(
                "subscription {} has neither lines nor a plan",
                sub.number
            ))
        })?;
        let line = InvoiceLine::new(
            format!("{} ({})", plan.name, sub.number),
            1,
            plan.price,
            Amount::zero(),
            None,
        )?;
        invoice.lines.push(line);
    } else {
        for sub_line in &sub.lines {
            let mut line = InvoiceLine::new(
                sub_line.description.clone(),
                sub_line.quantity,
                sub_line.unit_price,
                sub_line.discount,
                sub_line.tax_rate,
            )?;
            line.product_id = sub_line.product_id;
            invoice.lines.push(line);
        }
    }
    invoice.recalculate_totals()?;

    sub.next_invoice_date = Some(issued_at + Duration::days(PAYMENT_TERM_DAYS));
    Ok(invoice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{BillingPeriod, RecurringPlan, SubscriptionLine};
    use rust_decimal_macros::dec;

    fn two_line_invoice() -> Invoice {
        let mut invoice = Invoice::new("INV-000001", Uuid::new_v4());
        invoice
            .add_line(
                InvoiceLine::new("Hosting", 2, Amount::from_major(500), Amount::zero(), Some(dec!(18)))
                    .unwrap(),
            )
            .unwrap();
        invoice
            .add_line(
                InvoiceLine::new("Setup", 1, Amount::from_major(300), Amount::from_major(50), None)
                    .unwrap(),
            )
            .unwrap();
        invoice
    }

    #[test]
    fn test_two_line_totals_scenario() {
        let invoice = two_line_invoice();
        assert_eq!(invoice.subtotal, Amount::from_major(1250));
        assert_eq!(invoice.tax_amount, Amount::from_major(180));
        assert_eq!(invoice.total_amount, Amount::from_major(1430));
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let mut invoice = two_line_invoice();
        invoice.recalculate_totals().unwrap();
        let first = (invoice.subtotal, invoice.tax_amount, invoice.total_amount);
        invoice.recalculate_totals().unwrap();
        assert_eq!(
            first,
            (invoice.subtotal, invoice.tax_amount, invoice.total_amount)
        );
        assert_eq!(
            invoice.total_amount,
            invoice.subtotal.add(&invoice.tax_amount)
        );
    }

    #[test]
    fn test_remove_line_recomputes() {
        let mut invoice = two_line_invoice();
        let second = invoice.lines[1].id;
        invoice.remove_line(second).unwrap();
        assert_eq!(invoice.subtotal, Amount::from_major(1000));
        assert_eq!(invoice.total_amount, Amount::from_major(1180));

        let err = invoice.remove_line(second).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::NotFound(_))
        ));
    }

    #[test]
    fn test_lines_immutable_after_confirm() {
        let mut invoice = two_line_invoice();
        invoice.confirm().unwrap();

        let line =
            InvoiceLine::new("Extra", 1, Amount::from_major(100), Amount::zero(), None).unwrap();
        let err = invoice.add_line(line).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::InvalidState(_))
        ));
        assert!(invoice.set_notes("too late").is_err());
        assert!(invoice.set_due_date(Utc::now()).is_err());
    }

    #[test]
    fn test_draft_notes_and_due_date_editable() {
        let mut invoice = two_line_invoice();
        let due = Utc::now() + Duration::days(45);
        invoice.set_notes("net 45").unwrap();
        invoice.set_due_date(due).unwrap();
        assert_eq!(invoice.notes.as_deref(), Some("net 45"));
        assert_eq!(invoice.due_date, due);
    }

    #[test]
    fn test_confirm_only_from_draft() {
        let mut invoice = two_line_invoice();
        invoice.confirm().unwrap();
        assert!(invoice.confirm().is_err());
    }

    #[test]
    fn test_cancel_paths() {
        let mut draft = two_line_invoice();
        draft.cancel().unwrap();
        assert_eq!(draft.status, InvoiceStatus::Cancelled);
        assert!(draft.cancel().is_err());

        let mut confirmed = two_line_invoice();
        confirmed.confirm().unwrap();
        confirmed.cancel().unwrap();
        assert_eq!(confirmed.status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn test_payment_flips_to_paid_exactly_at_total() {
        let mut invoice = two_line_invoice();
        invoice.confirm().unwrap();

        invoice.apply_payment(Amount::from_major(1000)).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Confirmed);
        assert_eq!(invoice.remaining_balance(), Amount::from_major(430));

        invoice.apply_payment(Amount::from_major(430)).unwrap();
        assert!(invoice.is_paid());
        assert_eq!(invoice.paid_amount, Amount::from_major(1430));
    }

    #[test]
    fn test_overpayment_rejected() {
        let mut invoice = two_line_invoice();
        invoice.confirm().unwrap();
        invoice.apply_payment(Amount::from_major(1430)).unwrap();
        assert!(invoice.is_paid());

        let err = invoice.apply_payment(Amount::from_major(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::Overpayment { .. })
        ));
        assert_eq!(invoice.paid_amount, Amount::from_major(1430));
    }

    #[test]
    fn test_payment_rejected_on_draft() {
        let mut invoice = two_line_invoice();
        let err = invoice.apply_payment(Amount::from_major(100)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BillingError>(),
            Some(BillingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_generate_from_subscription_snapshots_lines() {
        let mut sub = crate::subscription::Subscription::new("SUB-000001", Uuid::new_v4())
            .with_line(
                SubscriptionLine::new("Seat", 2, Amount::from_major(500), Amount::zero(), Some(dec!(18)))
                    .unwrap(),
            );
        let issued_at = Utc::now();
        let invoice = generate_from_subscription(&mut sub, "INV-000002", issued_at).unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.subscription_id, Some(sub.id));
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.total_amount, Amount::from_major(1180));
        assert_eq!(invoice.due_date, issued_at + Duration::days(30));
        assert_eq!(sub.next_invoice_date, Some(issued_at + Duration::days(30)));
    }

    #[test]
    fn test_generate_from_plan_only_subscription() {
        let mut sub = crate::subscription::Subscription::new("SUB-000003", Uuid::new_v4())
            .with_plan(RecurringPlan::new(
                "Starter",
                Amount::from_major(1000),
                BillingPeriod::Monthly,
            ));
        let invoice = generate_from_subscription(&mut sub, "INV-000003", Utc::now()).unwrap();
        assert_eq!(invoice.lines.len(), 1);
        assert_eq!(invoice.total_amount, Amount::from_major(1000));
    }
}
