//! Persistence collaborator: the `BillingStore` trait and its in-memory double
//!
//! The store is handed to every component explicitly; nothing in this crate
//! reaches for a global client. Operations that must be atomic under
//! concurrent requests (discount redemption, payment recording) are store
//! methods so an implementation can hold the check and the write under one
//! lock (or one database row lock).

use crate::discount::Discount;
use crate::invoice::{Invoice, Payment, PaymentMethod};
use crate::subscription::{RecurringPlan, Subscription};
use crate::{Amount, BillingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Row visibility for the caller's identity.
///
/// Built once at the request boundary and applied at query construction,
/// never re-derived ad hoc inside handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Back-office access: every row.
    Internal,
    /// Portal access: only rows belonging to this customer.
    Customer(Uuid),
}

impl Scope {
    pub fn permits(&self, customer_id: Uuid) -> bool {
        match self {
            Scope::Internal => true,
            Scope::Customer(id) => *id == customer_id,
        }
    }
}

/// Customer contact details used for notifications.
///
/// The customer entity itself lives outside this core; only the fields the
/// notification sender needs are surfaced here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContactInfo {
    pub customer_id: Uuid,
    pub name: String,
    pub email: String,
}

/// Result of an atomic settlement activation.
#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    pub subscription: Subscription,
    /// True when the order had already been settled with this payment id
    /// (callback replay).
    pub already_active: bool,
}

/// Persistence operations required by the billing core.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // Customer contacts
    async fn save_contact(&self, contact: &ContactInfo) -> Result<()>;
    async fn get_contact(&self, customer_id: Uuid) -> Result<Option<ContactInfo>>;

    // Discounts
    async fn save_discount(&self, discount: &Discount) -> Result<()>;
    async fn find_discount(&self, code: &str) -> Result<Option<Discount>>;

    /// Atomically redeem a discount code: the limit check and the
    /// `usage_count` increment happen as one step.
    ///
    /// # Errors
    ///
    /// `BillingError::NotFound` for an unknown code;
    /// `BillingError::PolicyViolation` when the usage limit is exhausted.
    /// Under concurrent redemption of a code with `limit_usage = N`, exactly
    /// `N` calls succeed.
    async fn redeem_discount(&self, code: &str) -> Result<Discount>;

    // Plans
    async fn save_plan(&self, plan: &RecurringPlan) -> Result<()>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<RecurringPlan>>;

    // Subscriptions
    async fn save_subscription(&self, sub: &Subscription) -> Result<()>;
    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>>;
    async fn find_subscription_by_order(&self, order_id: &str) -> Result<Option<Subscription>>;
    async fn list_subscriptions(&self, scope: Scope) -> Result<Vec<Subscription>>;
    /// Next `SUB-NNNNNN` number.
    async fn next_subscription_number(&self) -> Result<String>;

    /// Atomically settle the subscription holding `order_id`: the status
    /// check and the CONFIRMED -> ACTIVE transition are one step, so
    /// concurrent replays of the same callback activate exactly once.
    ///
    /// # Errors
    ///
    /// `BillingError::NotFound` when no subscription holds the order;
    /// `BillingError::InvalidState` when the order was settled with a
    /// different payment id or the subscription cannot activate.
    async fn activate_by_order(
        &self,
        order_id: &str,
        payment_id: &str,
        performed_by: &str,
    ) -> Result<ActivationOutcome>;

    // Invoices
    async fn save_invoice(&self, invoice: &Invoice) -> Result<()>;
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>>;
    async fn list_invoices_for_subscription(&self, sub_id: Uuid) -> Result<Vec<Invoice>>;
    async fn list_invoices(&self, scope: Scope) -> Result<Vec<Invoice>>;
    /// Next `INV-NNNNNN` number.
    async fn next_invoice_number(&self) -> Result<String>;

    /// Atomically record a payment against an invoice: the balance check,
    /// the `paid_amount` write, and the `Payment` row are one step, so two
    /// concurrent partial payments can never jointly overpay.
    async fn record_payment(
        &self,
        invoice_id: Uuid,
        amount: Amount,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<Invoice>;
}

/// In-memory store used by tests and demos.
///
/// Mirrors the locking discipline a relational implementation would get from
/// row locks: one mutex per entity map, atomic ops performed entirely inside
/// the lock.
pub struct MemoryBillingStore {
    contacts: Mutex<HashMap<Uuid, ContactInfo>>,
    discounts: Mutex<HashMap<String, Discount>>,
    plans: Mutex<HashMap<Uuid, RecurringPlan>>,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    invoices: Mutex<HashMap<Uuid, Invoice>>,
    subscription_seq: AtomicU64,
    invoice_seq: AtomicU64,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self {
            contacts: Mutex::new(HashMap::new()),
            discounts: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            invoices: Mutex::new(HashMap::new()),
            subscription_seq: AtomicU64::new(0),
            invoice_seq: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryBillingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn save_contact(&self, contact: &ContactInfo) -> Result<()> {
        let mut contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        contacts.insert(contact.customer_id, contact.clone());
        Ok(())
    }

    async fn get_contact(&self, customer_id: Uuid) -> Result<Option<ContactInfo>> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts.get(&customer_id).cloned())
    }

    async fn save_discount(&self, discount: &Discount) -> Result<()> {
        let mut discounts = self.discounts.lock().unwrap_or_else(|e| e.into_inner());
        discounts.insert(discount.code.to_ascii_lowercase(), discount.clone());
        Ok(())
    }

    async fn find_discount(&self, code: &str) -> Result<Option<Discount>> {
        let discounts = self.discounts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(discounts.get(&code.to_ascii_lowercase()).cloned())
    }

    async fn redeem_discount(&self, code: &str) -> Result<Discount> {
        let mut discounts = self.discounts.lock().unwrap_or_else(|e| e.into_inner());
        let discount = discounts
            .get_mut(&code.to_ascii_lowercase())
            .ok_or_else(|| BillingError::NotFound(format!("discount code {}", code)))?;

        if !discount.has_remaining_usage() {
            return Err(BillingError::PolicyViolation(format!(
                "discount {} usage limit reached",
                discount.code
            ))
            .into());
        }
        discount.usage_count += 1;
        Ok(discount.clone())
    }

    async fn save_plan(&self, plan: &RecurringPlan) -> Result<()> {
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<RecurringPlan>> {
        let plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        Ok(plans.get(&id).cloned())
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions.insert(sub.id, sub.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subscriptions.get(&id).cloned())
    }

    async fn find_subscription_by_order(&self, order_id: &str) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(subscriptions
            .values()
            .find(|s| s.gateway_order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn list_subscriptions(&self, scope: Scope) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| scope.permits(s.customer_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(result)
    }

    async fn next_subscription_number(&self) -> Result<String> {
        let seq = self.subscription_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("SUB-{:06}", seq))
    }

    async fn activate_by_order(
        &self,
        order_id: &str,
        payment_id: &str,
        performed_by: &str,
    ) -> Result<ActivationOutcome> {
        use crate::subscription::SubscriptionStatus;

        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let sub = subscriptions
            .values_mut()
            .find(|s| s.gateway_order_id.as_deref() == Some(order_id))
            .ok_or_else(|| {
                BillingError::NotFound(format!("no subscription for gateway order {}", order_id))
            })?;

        if sub.status == SubscriptionStatus::Active {
            if sub.gateway_payment_id.as_deref() == Some(payment_id) {
                return Ok(ActivationOutcome {
                    subscription: sub.clone(),
                    already_active: true,
                });
            }
            return Err(BillingError::InvalidState(format!(
                "order {} already settled with a different payment",
                order_id
            ))
            .into());
        }

        sub.activate(payment_id, performed_by)?;
        Ok(ActivationOutcome {
            subscription: sub.clone(),
            already_active: false,
        })
    }

    async fn save_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>> {
        let invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        Ok(invoices.get(&id).cloned())
    }

    async fn list_invoices_for_subscription(&self, sub_id: Uuid) -> Result<Vec<Invoice>> {
        let invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<Invoice> = invoices
            .values()
            .filter(|i| i.subscription_id == Some(sub_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(result)
    }

    async fn list_invoices(&self, scope: Scope) -> Result<Vec<Invoice>> {
        let invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<Invoice> = invoices
            .values()
            .filter(|i| scope.permits(i.customer_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(result)
    }

    async fn next_invoice_number(&self) -> Result<String> {
        let seq = self.invoice_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("INV-{:06}", seq))
    }

    async fn record_payment(
        &self,
        invoice_id: Uuid,
        amount: Amount,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<Invoice> {
        let mut invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        let invoice = invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| BillingError::NotFound(format!("invoice {}", invoice_id)))?;

        invoice.apply_payment(amount)?;
        invoice.payments.push(Payment::completed(
            invoice.id,
            invoice.customer_id,
            amount,
            method,
            reference,
        ));
        Ok(invoice.clone())
    }
}
