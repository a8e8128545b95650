//! End-to-end billing flow tests
//!
//! Drives the full path: draft subscription, discounted checkout, gateway
//! order, signed callback, settlement invoice, renewal sweep.

use billkit_billing::{
    expected_signature, Amount, BillingError, BillingStore, ContactInfo, Discount, DiscountKind,
    GatewayConfig, GatewayOrder, InvoiceStatus, LogSender, MemoryBillingStore, PaymentCallback,
    PaymentGateway, PaymentMethod, Reconciler, RecurringPlan, RenewalMonitor, Scope, Subscription,
    SubscriptionStatus,
};
use billkit_billing::subscription::BillingPeriod;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SECRET: &str = "flow_test_secret";

struct FakeGateway {
    orders: Mutex<Vec<(i64, String)>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
        }
    }

    fn last_amount(&self) -> Option<i64> {
        self.orders.lock().unwrap().last().map(|(a, _)| *a)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
        _notes: &serde_json::Value,
    ) -> billkit_billing::Result<GatewayOrder> {
        let mut orders = self.orders.lock().unwrap();
        let id = format!("order_{}", orders.len() + 1);
        orders.push((amount_minor, receipt.to_string()));
        Ok(GatewayOrder {
            id,
            amount_minor,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        })
    }
}

struct World {
    store: Arc<MemoryBillingStore>,
    gateway: Arc<FakeGateway>,
    reconciler: Reconciler,
}

fn world() -> World {
    let store = Arc::new(MemoryBillingStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let reconciler = Reconciler::new(
        Arc::clone(&store) as Arc<dyn BillingStore>,
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::new(LogSender),
        GatewayConfig::new("key_id", SECRET),
    );
    World {
        store,
        gateway,
        reconciler,
    }
}

async fn seed_starter_subscription(world: &World) -> Subscription {
    let customer_id = Uuid::new_v4();
    world
        .store
        .save_contact(&ContactInfo {
            customer_id,
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
        })
        .await
        .unwrap();

    let plan = RecurringPlan::new("Starter", Amount::from_major(1000), BillingPeriod::Monthly);
    let number = world.store.next_subscription_number().await.unwrap();
    let sub = Subscription::new(number, customer_id).with_plan(plan);
    world.store.save_subscription(&sub).await.unwrap();
    sub
}

fn signed(order_id: &str, payment_id: &str) -> PaymentCallback {
    PaymentCallback {
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
        signature: expected_signature(SECRET, order_id, payment_id),
    }
}

#[tokio::test]
async fn welcome10_checkout_sends_106200_paise() {
    let w = world();
    let sub = seed_starter_subscription(&w).await;
    w.store
        .save_discount(&Discount::new("WELCOME10", DiscountKind::Percentage, dec!(10)))
        .await
        .unwrap();

    let checkout = w
        .reconciler
        .create_order(sub.id, Some("welcome10"), "portal")
        .await
        .unwrap();

    // 1000 - 10% = 900, +18% GST = 1062 -> 106200 paise on the wire.
    assert_eq!(checkout.subscription.amount_due, Amount::from_major(1062));
    assert_eq!(checkout.order.amount_minor, 106200);
    assert_eq!(w.gateway.last_amount(), Some(106200));
    assert_eq!(checkout.subscription.status, SubscriptionStatus::Confirmed);
    assert!(checkout.subscription.payment_link_expires_at.is_some());
}

#[tokio::test]
async fn settlement_produces_paid_invoice_and_audit_trail() {
    let w = world();
    let sub = seed_starter_subscription(&w).await;
    let checkout = w.reconciler.create_order(sub.id, None, "portal").await.unwrap();

    let settlement = w
        .reconciler
        .verify_and_settle(&signed(&checkout.order.id, "pay_1"), "webhook")
        .await
        .unwrap();

    let active = settlement.subscription;
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(active.amount_due.is_zero());
    assert_eq!(active.gateway_payment_id.as_deref(), Some("pay_1"));

    let invoice = settlement.invoice.expect("settlement invoice");
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.total_amount, Amount::from_major(1180));
    assert_eq!(invoice.paid_amount, invoice.total_amount);
    assert!(invoice.number.starts_with("INV-"));

    let stored = w.store.get_subscription(sub.id).await.unwrap().unwrap();
    let history = stored.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from_status, SubscriptionStatus::Draft);
    assert_eq!(history[0].to_status, SubscriptionStatus::Confirmed);
    assert_eq!(history[1].to_status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn tampered_callback_changes_nothing() {
    let w = world();
    let sub = seed_starter_subscription(&w).await;
    let checkout = w.reconciler.create_order(sub.id, None, "portal").await.unwrap();

    let mut callback = signed(&checkout.order.id, "pay_1");
    callback.signature = expected_signature("attacker_secret", &checkout.order.id, "pay_1");

    let err = w
        .reconciler
        .verify_and_settle(&callback, "webhook")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BillingError>(),
        Some(BillingError::SignatureMismatch)
    ));

    let stored = w.store.get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Confirmed);
    assert!(w
        .store
        .list_invoices_for_subscription(sub.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn abandoned_checkout_still_consumes_discount_slot() {
    let w = world();
    let sub = seed_starter_subscription(&w).await;
    w.store
        .save_discount(
            &Discount::new("ONCE", DiscountKind::Fixed, dec!(100)).with_limit_usage(1),
        )
        .await
        .unwrap();

    // Order created, callback never arrives.
    w.reconciler
        .create_order(sub.id, Some("ONCE"), "portal")
        .await
        .unwrap();

    let discount = w.store.find_discount("ONCE").await.unwrap().unwrap();
    assert_eq!(discount.usage_count, 1);
    assert!(!discount.has_remaining_usage());
}

#[tokio::test]
async fn manual_payment_against_renewal_invoice() {
    let w = world();
    let sub = seed_starter_subscription(&w).await;
    let checkout = w.reconciler.create_order(sub.id, None, "portal").await.unwrap();
    w.reconciler
        .verify_and_settle(&signed(&checkout.order.id, "pay_1"), "webhook")
        .await
        .unwrap();

    // Force the renewal due and sweep.
    let mut active = w.store.get_subscription(sub.id).await.unwrap().unwrap();
    active.next_invoice_date = Some(Utc::now() - ChronoDuration::days(1));
    w.store.save_subscription(&active).await.unwrap();

    let monitor = RenewalMonitor::new(
        Arc::clone(&w.store) as Arc<dyn BillingStore>,
        std::time::Duration::from_secs(3600),
    );
    let generated = monitor.check_due_invoices(Utc::now()).await.unwrap();
    assert_eq!(generated.len(), 1);
    let renewal = &generated[0];
    assert_eq!(renewal.status, InvoiceStatus::Draft);
    assert_eq!(renewal.total_amount, Amount::from_major(1000));

    // Confirm, then pay in full: flips to PAID; any further payment is an
    // overpayment.
    let mut invoice = w.store.get_invoice(renewal.id).await.unwrap().unwrap();
    invoice.confirm().unwrap();
    w.store.save_invoice(&invoice).await.unwrap();

    let paid = w
        .store
        .record_payment(
            invoice.id,
            Amount::from_major(1000),
            PaymentMethod::BankTransfer,
            Some("NEFT-1".to_string()),
        )
        .await
        .unwrap();
    assert!(paid.is_paid());

    let err = w
        .store
        .record_payment(invoice.id, Amount::from_major(1), PaymentMethod::Cash, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BillingError>(),
        Some(BillingError::Overpayment { .. })
    ));
}

#[tokio::test]
async fn portal_scope_hides_other_customers() {
    let w = world();
    let mine = seed_starter_subscription(&w).await;
    let other = seed_starter_subscription(&w).await;

    let visible = w
        .store
        .list_subscriptions(Scope::Customer(mine.customer_id))
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, mine.id);

    let everything = w.store.list_subscriptions(Scope::Internal).await.unwrap();
    assert_eq!(everything.len(), 2);
    assert!(everything.iter().any(|s| s.id == other.id));
}
