//! Billing provider interface.
//!
//! Provider responses are converted into [`ProviderSubscription`] at the
//! client boundary; nothing deeper in the crate sees raw provider objects.

use async_trait::async_trait;

use super::error::BillingError;
use super::storage::SubscriptionStatus;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, BillingError>;

/// Operations consign needs from the billing provider of record.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Fetch the provider's current view of a subscription.
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription>;

    /// Create a provider customer for a tenant. Returns the customer ID.
    async fn create_customer(&self, tenant_id: &str) -> ProviderResult<String>;

    /// Create a subscription for an existing customer.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ProviderResult<ProviderSubscription>;

    /// Swap the subscription's price using the provider's native plan swap.
    async fn update_subscription_plan(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> ProviderResult<ProviderSubscription>;

    /// Schedule the subscription to end at the close of the current period.
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription>;
}

#[async_trait]
impl<T: BillingProvider + ?Sized> BillingProvider for std::sync::Arc<T> {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        (**self).retrieve_subscription(subscription_id).await
    }

    async fn create_customer(&self, tenant_id: &str) -> ProviderResult<String> {
        (**self).create_customer(tenant_id).await
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ProviderResult<ProviderSubscription> {
        (**self).create_subscription(request).await
    }

    async fn update_subscription_plan(
        &self,
        subscription_id: &str,
        new_price_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        (**self)
            .update_subscription_plan(subscription_id, new_price_id)
            .await
    }

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> ProviderResult<ProviderSubscription> {
        (**self).cancel_at_period_end(subscription_id).await
    }
}

/// Request to create a provider subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub payment_method_id: String,
    /// Stored in provider metadata so the subscription can be traced back.
    pub tenant_id: String,
    pub referrer_tenant_id: Option<String>,
}

/// Strongly-typed provider subscription state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    /// Price of the subscription's plan item, if the provider reported one.
    pub price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: u64,
    pub current_period_end: u64,
    pub cancel_at_period_end: bool,
}

impl ProviderSubscription {
    /// Reject responses whose period is inverted.
    pub fn validated(self, operation: &str) -> ProviderResult<Self> {
        if self.current_period_end < self.current_period_start {
            return Err(BillingError::provider(
                operation,
                format!(
                    "subscription '{}' reports period end {} before start {}",
                    self.id, self.current_period_end, self.current_period_start
                ),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(start: u64, end: u64) -> ProviderSubscription {
        ProviderSubscription {
            id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            price_id: Some("price_basic".to_string()),
            status: SubscriptionStatus::Active,
            current_period_start: start,
            current_period_end: end,
            cancel_at_period_end: false,
        }
    }

    #[test]
    fn test_validated_accepts_ordered_period() {
        assert!(sub(10, 20).validated("retrieve").is_ok());
        assert!(sub(10, 10).validated("retrieve").is_ok());
    }

    #[test]
    fn test_validated_rejects_inverted_period() {
        let err = sub(20, 10).validated("retrieve").unwrap_err();
        assert!(matches!(err, BillingError::ProviderError { .. }));
    }
}
