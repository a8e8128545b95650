//! # billkit-billing
//!
//! Subscription lifecycle and billing computation for a recurring-billing
//! back office: the state machine carrying a subscription from draft through
//! settlement, the gateway order/verify reconciliation, and the derived
//! financial math (discounts, tax, invoice totals, payment application) that
//! must stay numerically consistent across every path.
//!
//! ## Guarantees
//!
//! - Fixed-point decimal arithmetic for all money; totals are always
//!   recomputed fresh from the line list, never patched incrementally
//! - Forward-only lifecycle transitions with an append-only audit history
//! - Constant-time verification of gateway callback signatures
//! - Atomic discount redemption and payment application under concurrency
//! - A verified payment is never unwound by a downstream bookkeeping failure
//!
//! Persistence, the payment gateway, and the notification channel are
//! collaborator traits injected at construction; in-memory doubles ship with
//! the crate.

pub mod amount;
pub mod discount;
pub mod gateway;
pub mod invoice;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod reconcile;
pub mod render;
pub mod storage;
pub mod subscription;
pub mod tax;

pub use amount::Amount;
pub use discount::{Discount, DiscountKind, PurchaseContext};
pub use gateway::{
    expected_signature, verify_callback_signature, GatewayConfig, GatewayOrder, PaymentCallback,
    PaymentGateway,
};
pub use invoice::{
    generate_from_subscription, Invoice, InvoiceLine, InvoiceStatus, Payment, PaymentMethod,
    PaymentState,
};
pub use ledger::{aggregate_totals, apply_tax, line_amount, LedgerTotals, LineFigures};
pub use monitor::RenewalMonitor;
pub use notify::{InvoiceEmail, LogSender, NotificationSender};
pub use reconcile::{CheckoutOrder, Reconciler, Settlement, GST_RATE_PERCENT};
pub use render::{render, InvoiceFormat};
pub use storage::{ActivationOutcome, BillingStore, ContactInfo, MemoryBillingStore, Scope};
pub use subscription::{
    BillingPeriod, HistoryEntry, RecurringPlan, Subscription, SubscriptionLine,
    SubscriptionStatus,
};
pub use tax::{ProductType, SuggestionSource, Tax, TaxResolver, TaxSuggestion, TaxWarning};

pub type Result<T> = anyhow::Result<T>;

/// Domain error taxonomy. Every variant is recovered at the request boundary
/// and translated into a caller-visible rejection; none aborts the process.
#[derive(thiserror::Error, Debug)]
pub enum BillingError {
    /// Entity lookup miss. Surfaced as "not found", never retried.
    #[error("not found: {0}")]
    NotFound(String),
    /// Illegal state transition or status-gated mutation attempt.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Plan or discount policy rejects the action.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    /// Payment exceeds the invoice's remaining balance.
    #[error("payment of {amount} exceeds remaining balance {remaining}")]
    Overpayment { amount: Amount, remaining: Amount },
    /// Checkout computed a zero or negative payable amount.
    #[error("no payable amount for order")]
    NoPayableAmount,
    /// Gateway callback signature failed verification. Security-sensitive:
    /// logged at high severity, never silently swallowed.
    #[error("payment signature mismatch")]
    SignatureMismatch,
    /// Malformed input: bad quantities, negative prices, inverted ranges.
    #[error("validation error: {0}")]
    Validation(String),
}
