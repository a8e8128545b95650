//! Notification sender collaborator
//!
//! Email delivery is fire-and-forget: a failure is logged and never affects
//! the transaction that triggered it.

use crate::{Amount, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Payload for the payment-confirmation email.
#[derive(Debug, Clone)]
pub struct InvoiceEmail {
    pub customer_name: String,
    pub customer_email: String,
    pub invoice_number: String,
    pub subscription_number: String,
    pub plan_name: String,
    pub amount: Amount,
    pub payment_id: String,
    pub invoice_date: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_invoice_email(&self, email: &InvoiceEmail) -> Result<()>;
}

/// Sender that only logs. Used in tests and as a safe default.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send_invoice_email(&self, email: &InvoiceEmail) -> Result<()> {
        tracing::info!(
            invoice = %email.invoice_number,
            subscription = %email.subscription_number,
            to = %email.customer_email,
            amount = %email.amount,
            "invoice email"
        );
        Ok(())
    }
}
