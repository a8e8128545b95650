//! Payment reconciliation: gateway order creation and callback settlement
//!
//! Two-phase protocol against the external gateway. Phase one prices the
//! checkout (discount, then GST on the discounted subtotal), opens a gateway
//! order, and moves the subscription DRAFT -> CONFIRMED. Phase two verifies
//! the signed callback and settles: CONFIRMED -> ACTIVE, then auto-invoicing
//! and notification as best-effort side effects.
//!
//! Payment success is the single most important guarantee here: once the
//! signature verifies and the ACTIVE transition is persisted, no downstream
//! bookkeeping failure unwinds it. Invoicing failures are logged with the
//! order id as the dead-letter key and retried on callback replay.
//!
//! Discount usage is counted at order creation, not at verification: an
//! abandoned CONFIRMED order still consumes a usage slot. Known accounting
//! quirk, preserved deliberately; downstream reporting depends on it.

use crate::gateway::{verify_callback_signature, GatewayConfig, GatewayOrder, PaymentCallback, PaymentGateway};
use crate::invoice::{Invoice, InvoiceLine, PaymentMethod};
use crate::notify::{InvoiceEmail, NotificationSender};
use crate::storage::BillingStore;
use crate::subscription::{Subscription, SubscriptionStatus};
use crate::{ledger, Amount, BillingError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

/// Current ruleset: GST on every checkout, recomputed through the ledger.
pub const GST_RATE_PERCENT: Decimal = dec!(18);

/// Result of phase one: the confirmed subscription and its gateway order.
#[derive(Debug, Clone)]
pub struct CheckoutOrder {
    pub subscription: Subscription,
    pub order: GatewayOrder,
}

/// Result of phase two.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub subscription: Subscription,
    /// The auto-generated PAID invoice; `None` when the invoicing side
    /// effect failed (logged, recoverable on replay).
    pub invoice: Option<Invoice>,
    /// True when this callback had already been settled.
    pub replayed: bool,
}

pub struct Reconciler {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSender>,
    config: GatewayConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSender>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    /// Phase one: price the checkout and open a gateway order.
    ///
    /// Payable amount = (subtotal - discount) + GST, all through the ledger.
    ///
    /// # Errors
    ///
    /// - `BillingError::NotFound` for an unknown subscription or code
    /// - `BillingError::InvalidState` unless DRAFT or QUOTATION
    /// - `BillingError::PolicyViolation` from discount validity rules
    /// - `BillingError::NoPayableAmount` when the computed total is zero
    pub async fn create_order(
        &self,
        subscription_id: Uuid,
        discount_code: Option<&str>,
        performed_by: &str,
    ) -> Result<CheckoutOrder> {
        let mut sub = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", subscription_id)))?;

        if !matches!(
            sub.status,
            SubscriptionStatus::Draft | SubscriptionStatus::Quotation
        ) {
            return Err(BillingError::InvalidState(format!(
                "subscription {} in status {} cannot start checkout",
                sub.number, sub.status
            ))
            .into());
        }

        let subtotal = sub.charge_subtotal()?;

        let discount_amount = match discount_code {
            Some(code) => {
                let discount = self
                    .store
                    .find_discount(code)
                    .await?
                    .ok_or_else(|| BillingError::NotFound(format!("discount code {}", code)))?;
                let ctx = crate::discount::PurchaseContext {
                    subtotal,
                    quantity: sub.total_quantity(),
                    reference_date: Utc::now(),
                };
                discount.evaluate(&ctx)?
            }
            None => Amount::zero(),
        };

        let payable = subtotal.subtract(&discount_amount);
        let tax = ledger::apply_tax(payable, GST_RATE_PERCENT);
        let total = payable.add(&tax);
        if total.is_zero() || total.is_negative() {
            return Err(BillingError::NoPayableAmount.into());
        }

        // Usage is consumed here, at order creation; see the module docs.
        if let Some(code) = discount_code {
            self.store.redeem_discount(code).await?;
        }

        let notes = serde_json::json!({
            "subscription_id": sub.id,
            "subscription_number": sub.number,
        });
        let order = self
            .gateway
            .create_order(total.to_minor_units(), &self.config.currency, &sub.number, &notes)
            .await?;

        sub.recurring_total = subtotal;
        sub.discount_code = discount_code.map(str::to_string);
        sub.discount_amount = discount_amount;
        sub.confirm_order(order.id.clone(), total, performed_by)?;
        self.store.save_subscription(&sub).await?;

        tracing::debug!(
            subscription = %sub.number,
            order = %order.id,
            amount_due = %total,
            "gateway order created"
        );

        Ok(CheckoutOrder {
            subscription: sub,
            order,
        })
    }

    /// Phase two: verify the signed callback and settle.
    ///
    /// Idempotent on the order id: replaying an already-settled callback
    /// returns the prior outcome (and re-attempts the invoice sub-step if it
    /// is missing) without duplicating records.
    pub async fn verify_and_settle(
        &self,
        callback: &PaymentCallback,
        performed_by: &str,
    ) -> Result<Settlement> {
        if let Err(e) = verify_callback_signature(&self.config.key_secret, callback) {
            tracing::error!(
                order = %callback.order_id,
                payment = %callback.payment_id,
                "payment callback signature mismatch"
            );
            return Err(e);
        }

        let outcome = match self
            .store
            .activate_by_order(&callback.order_id, &callback.payment_id, performed_by)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(
                    e.downcast_ref::<BillingError>(),
                    Some(BillingError::NotFound(_))
                ) {
                    // A verified callback with no matching order is a fatal
                    // inconsistency, not a benign miss.
                    tracing::error!(
                        order = %callback.order_id,
                        payment = %callback.payment_id,
                        "verified payment callback references an unknown gateway order"
                    );
                }
                return Err(e);
            }
        };
        let sub = outcome.subscription;
        // Payment success is committed from this point on; everything below
        // is best-effort bookkeeping.

        if outcome.already_active {
            let invoice = self.ensure_settlement_invoice(&sub, callback).await;
            return Ok(Settlement {
                subscription: sub,
                invoice,
                replayed: true,
            });
        }

        let invoice = self.ensure_settlement_invoice(&sub, callback).await;
        if let Some(invoice) = &invoice {
            self.spawn_confirmation_email(&sub, invoice, &callback.payment_id)
                .await;
        }

        Ok(Settlement {
            subscription: sub,
            invoice,
            replayed: false,
        })
    }

    /// Locate or create the PAID settlement invoice. Never propagates
    /// failure: a miss here is logged against the order id for replay.
    async fn ensure_settlement_invoice(
        &self,
        sub: &Subscription,
        callback: &PaymentCallback,
    ) -> Option<Invoice> {
        match self.store.list_invoices_for_subscription(sub.id).await {
            Ok(existing) if !existing.is_empty() => return existing.into_iter().next(),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    order = %callback.order_id,
                    error = %e,
                    "could not check for an existing settlement invoice"
                );
                return None;
            }
        }

        match self.issue_settlement_invoice(sub, &callback.payment_id).await {
            Ok(invoice) => Some(invoice),
            Err(e) => {
                tracing::error!(
                    order = %callback.order_id,
                    subscription = %sub.number,
                    error = %e,
                    "auto-invoicing failed after verified payment; will retry on replay"
                );
                None
            }
        }
    }

    /// Build the settlement invoice: one consolidated line for the
    /// discounted subscription charge, taxed at the checkout rate, confirmed
    /// and paid in full against the gateway payment.
    async fn issue_settlement_invoice(
        &self,
        sub: &Subscription,
        payment_id: &str,
    ) -> Result<Invoice> {
        let number = self.store.next_invoice_number().await?;
        let plan_name = sub
            .plan
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "subscription services".to_string());

        let payable = sub.recurring_total.subtract(&sub.discount_amount);
        let mut invoice = Invoice::new(number, sub.customer_id);
        invoice.contact_id = sub.contact_id;
        invoice.subscription_id = Some(sub.id);
        invoice.add_line(InvoiceLine::new(
            format!("{} ({})", plan_name, sub.number),
            1,
            payable,
            Amount::zero(),
            Some(GST_RATE_PERCENT),
        )?)?;
        invoice.confirm()?;
        self.store.save_invoice(&invoice).await?;

        let paid = self
            .store
            .record_payment(
                invoice.id,
                invoice.total_amount,
                PaymentMethod::Gateway,
                Some(payment_id.to_string()),
            )
            .await?;
        Ok(paid)
    }

    /// Fire-and-forget confirmation email; failures are logged only.
    async fn spawn_confirmation_email(&self, sub: &Subscription, invoice: &Invoice, payment_id: &str) {
        let contact = match self.store.get_contact(sub.customer_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                tracing::debug!(
                    subscription = %sub.number,
                    "no contact on file, skipping confirmation email"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(subscription = %sub.number, error = %e, "contact lookup failed");
                return;
            }
        };

        let email = InvoiceEmail {
            customer_name: contact.name,
            customer_email: contact.email,
            invoice_number: invoice.number.clone(),
            subscription_number: sub.number.clone(),
            plan_name: sub
                .plan
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            amount: invoice.total_amount,
            payment_id: payment_id.to_string(),
            invoice_date: invoice.issue_date,
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.send_invoice_email(&email).await {
                tracing::warn!(error = %e, "confirmation email failed");
            }
        });
    }
}
