//! In-process billing provider.
//!
//! Behaves like a minimal subscription provider without leaving the
//! process. Used when no Stripe key is configured and throughout the tests,
//! where provider state can be edited directly and failures injected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::BillingError;
use super::provider::{
    BillingProvider, CreateSubscriptionRequest, ProviderResult, ProviderSubscription,
};
use super::storage::SubscriptionStatus;
use crate::utils::unix_now;

/// Payment method that the sandbox always declines.
pub const DECLINED_PAYMENT_METHOD: &str = "pm_card_declined";

const DEFAULT_PERIOD_DAYS: u64 = 30;

/// In-process billing provider with failure injection and call counters.
#[derive(Clone, Default)]
pub struct SandboxBillingProvider {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: RwLock<State>,
    counter: AtomicU64,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<String, ProviderSubscription>,
    customers: HashMap<String, String>,
    failing_subscriptions: HashSet<String>,
    failing_operations: HashSet<String>,
    calls: HashMap<&'static str, u64>,
    period_days: Option<u64>,
}

impl State {
    fn record_call(&mut self, operation: &'static str) {
        *self.calls.entry(operation).or_insert(0) += 1;
    }

    fn check_failure(&self, operation: &str, subscription_id: Option<&str>) -> ProviderResult<()> {
        let injected = self.failing_operations.contains(operation)
            || subscription_id.is_some_and(|id| self.failing_subscriptions.contains(id));
        if injected {
            return Err(BillingError::ProviderError {
                operation: operation.to_string(),
                message: "sandbox provider unavailable".to_string(),
                code: None,
                http_status: Some(503),
            });
        }
        Ok(())
    }

    fn subscription_mut(
        &mut self,
        subscription_id: &str,
    ) -> ProviderResult<&mut ProviderSubscription> {
        self.subscriptions.get_mut(subscription_id).ok_or_else(|| {
            BillingError::ProviderSubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
            }
        })
    }
}

impl SandboxBillingProvider {
    /// Create a sandbox provider with 30-day billing periods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different billing period length for new subscriptions.
    pub async fn set_period_days(&self, days: u64) {
        self.inner.state.write().await.period_days = Some(days);
    }

    /// Insert or replace a subscription as the provider sees it.
    ///
    /// Its customer becomes known to the sandbox as well.
    pub async fn insert_subscription(&self, subscription: ProviderSubscription) {
        let mut state = self.inner.state.write().await;
        state
            .customers
            .entry(subscription.customer_id.clone())
            .or_default();
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Edit provider-side state, as if changed on the provider's dashboard.
    ///
    /// Returns `false` if the subscription does not exist.
    pub async fn modify_subscription(
        &self,
        subscription_id: &str,
        edit: impl FnOnce(&mut ProviderSubscription),
    ) -> bool {
        match self
            .inner
            .state
            .write()
            .await
            .subscriptions
            .get_mut(subscription_id)
        {
            Some(subscription) => {
                edit(subscription);
                true
            }
            None => false,
        }
    }

    /// Current provider-side state of a subscription.
    pub async fn subscription(&self, subscription_id: &str) -> Option<ProviderSubscription> {
        self.inner
            .state
            .read()
            .await
            .subscriptions
            .get(subscription_id)
            .cloned()
    }

    /// Fail every call that touches this subscription.
    pub async fn fail_subscription(&self, subscription_id: &str) {
        self.inner
            .state
            .write()
            .await
            .failing_subscriptions
            .insert(subscription_id.to_string());
    }

    /// Fail every call to the named operation (e.g. `"create_customer"`).
    pub async fn fail_operation(&self, operation: &str) {
        self.inner
            .state
            .write()
            .await
            .failing_operations
            .insert(operation.to_string());
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        let mut state = self.inner.state.write().await;
        state.failing_subscriptions.clear();
        state.failing_operations.clear();
    }

    /// How many times an operation has been called.
    pub async fn call_count(&self, operation: &str) -> u64 {
        self.inner
            .state
            .read()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_sandbox_{}", prefix, n)
    }
}

#[async_trait]
impl BillingProvider for SandboxBillingProvider {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        let mut state = self.inner.state.write().await;
        state.record_call("retrieve_subscription");
        state.check_failure("retrieve_subscription", Some(subscription_id))?;
        state.subscription_mut(subscription_id).map(|s| s.clone())
    }

    async fn create_customer(&self, tenant_id: &str) -> ProviderResult<String> {
        let id = self.next_id("cus");
        let mut state = self.inner.state.write().await;
        state.record_call("create_customer");
        state.check_failure("create_customer", None)?;
        state.customers.insert(id.clone(), tenant_id.to_string());
        Ok(id)
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ProviderResult<ProviderSubscription> {
        let id = self.next_id("sub");
        let mut state = self.inner.state.write().await;
        state.record_call("create_subscription");
        state.check_failure("create_subscription", None)?;

        if !state.customers.contains_key(&request.customer_id) {
            return Err(BillingError::ProviderError {
                operation: "create_subscription".to_string(),
                message: format!("No such customer: '{}'", request.customer_id),
                code: Some("resource_missing".to_string()),
                http_status: Some(400),
            });
        }
        if request.payment_method_id == DECLINED_PAYMENT_METHOD {
            return Err(BillingError::ProviderError {
                operation: "create_subscription".to_string(),
                message: "Your card was declined.".to_string(),
                code: Some("card_declined".to_string()),
                http_status: Some(402),
            });
        }

        let now = unix_now();
        let period_days = state.period_days.unwrap_or(DEFAULT_PERIOD_DAYS);
        let subscription = ProviderSubscription {
            id: id.clone(),
            customer_id: request.customer_id,
            price_id: Some(request.price_id),
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now + period_days * 86_400,
            cancel_at_period_end: false,
        };
        state.subscriptions.insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription_plan(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        let mut state = self.inner.state.write().await;
        state.record_call("update_subscription_plan");
        state.check_failure("update_subscription_plan", Some(subscription_id))?;
        let subscription = state.subscription_mut(subscription_id)?;
        subscription.price_id = Some(new_price_id.to_string());
        Ok(subscription.clone())
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        let mut state = self.inner.state.write().await;
        state.record_call("cancel_at_period_end");
        state.check_failure("cancel_at_period_end", Some(subscription_id))?;
        let subscription = state.subscription_mut(subscription_id)?;
        subscription.cancel_at_period_end = true;
        Ok(subscription.clone())
    }
}
