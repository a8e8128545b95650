//! Renewal monitor: periodic generation of draft renewal invoices
//!
//! Scans active subscriptions whose `next_invoice_date` has passed and runs
//! them through the invoice engine. Also closes subscriptions whose plan
//! auto-closes once their expiration date has lapsed. Errors on one
//! subscription are logged and never stop the sweep.

use crate::invoice::{generate_from_subscription, Invoice};
use crate::storage::{BillingStore, Scope};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub struct RenewalMonitor {
    store: Arc<dyn BillingStore>,
    check_interval: Duration,
}

impl RenewalMonitor {
    pub fn new(store: Arc<dyn BillingStore>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
        }
    }

    /// Default hourly sweep.
    pub fn with_default_interval(store: Arc<dyn BillingStore>) -> Self {
        Self::new(store, Duration::from_secs(3600))
    }

    /// Run the sweep loop until the task is dropped.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.check_due_invoices(Utc::now()).await {
                tracing::warn!(error = %e, "renewal sweep failed");
            }
            sleep(self.check_interval).await;
        }
    }

    /// One sweep: generate a draft renewal invoice for every due
    /// subscription and auto-close lapsed ones.
    pub async fn check_due_invoices(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>> {
        let subscriptions = self.store.list_subscriptions(Scope::Internal).await?;
        let mut generated = Vec::new();

        for mut sub in subscriptions {
            if self.auto_close_if_lapsed(&mut sub, now).await {
                continue;
            }
            if !sub.is_invoice_due(now) {
                continue;
            }
            if sub.plan.as_ref().is_some_and(|p| !p.renewable) {
                tracing::debug!(subscription = %sub.number, "plan not renewable, skipping");
                continue;
            }

            let number = self.store.next_invoice_number().await?;
            match generate_from_subscription(&mut sub, number, now) {
                Ok(invoice) => {
                    self.store.save_invoice(&invoice).await?;
                    self.store.save_subscription(&sub).await?;
                    generated.push(invoice);
                }
                Err(e) => {
                    tracing::warn!(
                        subscription = %sub.number,
                        error = %e,
                        "renewal invoice generation failed"
                    );
                }
            }
        }

        Ok(generated)
    }

    /// Close a lapsed subscription when its plan says so. Returns true when
    /// the subscription was closed.
    async fn auto_close_if_lapsed(
        &self,
        sub: &mut crate::subscription::Subscription,
        now: DateTime<Utc>,
    ) -> bool {
        let should_close = sub.plan.as_ref().is_some_and(|p| p.auto_close)
            && sub.expiration_date.is_some_and(|exp| exp <= now);
        if !should_close {
            return false;
        }
        match sub.close("system") {
            Ok(()) => {
                if let Err(e) = self.store.save_subscription(sub).await {
                    tracing::warn!(subscription = %sub.number, error = %e, "auto-close save failed");
                }
                true
            }
            Err(e) => {
                tracing::warn!(subscription = %sub.number, error = %e, "auto-close rejected");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBillingStore;
    use crate::subscription::{BillingPeriod, RecurringPlan, Subscription, SubscriptionStatus};
    use crate::Amount;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    async fn active_subscription(store: &MemoryBillingStore, plan: RecurringPlan) -> Subscription {
        let mut sub = Subscription::new("SUB-000001", Uuid::new_v4()).with_plan(plan);
        sub.confirm_order("order_1", Amount::from_major(1180), "admin").unwrap();
        sub.activate("pay_1", "webhook").unwrap();
        store.save_subscription(&sub).await.unwrap();
        store.get_subscription(sub.id).await.unwrap().unwrap()
    }

    fn monitor(store: &Arc<MemoryBillingStore>) -> RenewalMonitor {
        RenewalMonitor::new(
            Arc::clone(store) as Arc<dyn BillingStore>,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_due_subscription_gets_draft_invoice() {
        let store = Arc::new(MemoryBillingStore::new());
        let plan = RecurringPlan::new("Starter", Amount::from_major(1000), BillingPeriod::Monthly);
        let mut sub = active_subscription(&store, plan).await;
        sub.next_invoice_date = Some(Utc::now() - ChronoDuration::days(1));
        store.save_subscription(&sub).await.unwrap();

        let generated = monitor(&store).check_due_invoices(Utc::now()).await.unwrap();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].total_amount, Amount::from_major(1000));

        // next_invoice_date advanced: a second sweep finds nothing due.
        let again = monitor(&store).check_due_invoices(Utc::now()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_not_due_subscription_skipped() {
        let store = Arc::new(MemoryBillingStore::new());
        let plan = RecurringPlan::new("Starter", Amount::from_major(1000), BillingPeriod::Monthly);
        let mut sub = active_subscription(&store, plan).await;
        sub.next_invoice_date = Some(Utc::now() + ChronoDuration::days(10));
        store.save_subscription(&sub).await.unwrap();

        let generated = monitor(&store).check_due_invoices(Utc::now()).await.unwrap();
        assert!(generated.is_empty());
    }

    #[tokio::test]
    async fn test_non_renewable_plan_skipped() {
        let store = Arc::new(MemoryBillingStore::new());
        let plan = RecurringPlan::new("Fixed", Amount::from_major(1000), BillingPeriod::Monthly)
            .with_flags(false, true, false, false);
        let mut sub = active_subscription(&store, plan).await;
        sub.next_invoice_date = Some(Utc::now() - ChronoDuration::days(1));
        store.save_subscription(&sub).await.unwrap();

        let generated = monitor(&store).check_due_invoices(Utc::now()).await.unwrap();
        assert!(generated.is_empty());
    }

    #[tokio::test]
    async fn test_auto_close_on_expiration() {
        let store = Arc::new(MemoryBillingStore::new());
        let plan = RecurringPlan::new("Term", Amount::from_major(1000), BillingPeriod::Monthly)
            .with_flags(true, true, false, true);
        let mut sub = active_subscription(&store, plan).await;
        sub.expiration_date = Some(Utc::now() - ChronoDuration::days(1));
        sub.next_invoice_date = Some(Utc::now() - ChronoDuration::days(1));
        store.save_subscription(&sub).await.unwrap();

        let generated = monitor(&store).check_due_invoices(Utc::now()).await.unwrap();
        assert!(generated.is_empty(), "closed subscriptions are not billed");

        let stored = store.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Closed);
    }
}
