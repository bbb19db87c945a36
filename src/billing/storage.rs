//! Storage traits for tenant billing state.
//!
//! Implement [`TenantStore`] to persist subscriptions, tenant entitlement
//! flags and device sessions. [`InMemoryTenantStore`](super::InMemoryTenantStore)
//! backs development and tests; the SeaORM store backs production.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for storing tenant billing data.
///
/// The subscription record is the source of truth. The tenant account's
/// period fields and `is_active` flag are a denormalized read cache that the
/// subscription manager keeps in step with it.
#[async_trait]
pub trait TenantStore: Send + Sync {
    // Subscriptions

    /// Get the current subscription for a tenant.
    async fn find_subscription_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<StoredSubscription>>;

    /// Insert or replace the tenant's subscription.
    ///
    /// Also mirrors the billing period onto the tenant account, creating the
    /// account (inactive) if it does not exist. Does not touch `is_active`.
    async fn upsert_subscription(&self, record: &StoredSubscription) -> Result<()>;

    /// List every current subscription.
    async fn list_all_subscriptions(&self) -> Result<Vec<StoredSubscription>>;

    /// Keep a copy of a subscription that is about to be replaced.
    async fn record_superseded_subscription(&self, record: &StoredSubscription) -> Result<()>;

    /// List a tenant's superseded subscriptions, oldest first.
    async fn list_superseded_subscriptions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<StoredSubscription>>;

    // Tenant accounts

    /// Get a tenant account.
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantAccount>>;

    /// Set the tenant's entitlement flag, creating the account if needed.
    async fn set_tenant_active(&self, tenant_id: &str, is_active: bool) -> Result<()>;

    /// Cache the tenant's billing-provider customer, creating the account if needed.
    async fn set_billing_customer_id(&self, tenant_id: &str, customer_id: &str) -> Result<()>;

    /// Persist a reconciled subscription together with the tenant's derived state.
    ///
    /// Writes the subscription, the tenant's mirrored period and `is_active`.
    ///
    /// # Important: Production Implementations Should Override This
    ///
    /// The default implementation performs two separate writes. A crash
    /// between them leaves the tenant flag stale until the next sweep
    /// recomputes it. Database-backed stores should run both writes in one
    /// transaction.
    async fn save_reconciled(&self, record: &StoredSubscription, is_active: bool) -> Result<()> {
        self.upsert_subscription(record).await?;
        self.set_tenant_active(&record.tenant_id, is_active).await
    }

    // Device sessions

    /// Count a tenant's registered device sessions.
    async fn count_active_sessions(&self, tenant_id: &str) -> Result<u64>;

    /// Get the session for a (tenant, device) pair.
    async fn find_active_session(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<ActiveSession>>;

    /// Insert a session, or refresh `last_active_at` if the pair already exists.
    async fn upsert_active_session(&self, session: &ActiveSession) -> Result<()>;

    /// List a tenant's sessions, most recently active first.
    async fn list_active_sessions(&self, tenant_id: &str) -> Result<Vec<ActiveSession>>;

    /// Remove a session. Returns `false` if it did not exist.
    async fn delete_active_session(&self, tenant_id: &str, device_id: &str) -> Result<bool>;
}

#[async_trait]
impl<T: TenantStore + ?Sized> TenantStore for std::sync::Arc<T> {
    async fn find_subscription_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        (**self).find_subscription_by_tenant(tenant_id).await
    }

    async fn upsert_subscription(&self, record: &StoredSubscription) -> Result<()> {
        (**self).upsert_subscription(record).await
    }

    async fn list_all_subscriptions(&self) -> Result<Vec<StoredSubscription>> {
        (**self).list_all_subscriptions().await
    }

    async fn record_superseded_subscription(&self, record: &StoredSubscription) -> Result<()> {
        (**self).record_superseded_subscription(record).await
    }

    async fn list_superseded_subscriptions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<StoredSubscription>> {
        (**self).list_superseded_subscriptions(tenant_id).await
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantAccount>> {
        (**self).get_tenant(tenant_id).await
    }

    async fn set_tenant_active(&self, tenant_id: &str, is_active: bool) -> Result<()> {
        (**self).set_tenant_active(tenant_id, is_active).await
    }

    async fn set_billing_customer_id(&self, tenant_id: &str, customer_id: &str) -> Result<()> {
        (**self).set_billing_customer_id(tenant_id, customer_id).await
    }

    async fn save_reconciled(&self, record: &StoredSubscription, is_active: bool) -> Result<()> {
        (**self).save_reconciled(record, is_active).await
    }

    async fn count_active_sessions(&self, tenant_id: &str) -> Result<u64> {
        (**self).count_active_sessions(tenant_id).await
    }

    async fn find_active_session(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<ActiveSession>> {
        (**self).find_active_session(tenant_id, device_id).await
    }

    async fn upsert_active_session(&self, session: &ActiveSession) -> Result<()> {
        (**self).upsert_active_session(session).await
    }

    async fn list_active_sessions(&self, tenant_id: &str) -> Result<Vec<ActiveSession>> {
        (**self).list_active_sessions(tenant_id).await
    }

    async fn delete_active_session(&self, tenant_id: &str, device_id: &str) -> Result<bool> {
        (**self).delete_active_session(tenant_id, device_id).await
    }
}

/// Local mirror of a tenant's billing-provider subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSubscription {
    /// Owning tenant; one current subscription per tenant.
    pub tenant_id: String,
    /// Subscription ID in the billing provider; globally unique.
    pub external_subscription_id: String,
    /// Customer ID in the billing provider.
    pub external_customer_id: String,
    /// Plan name (the configured plan id).
    pub plan_name: String,
    /// Price ID of the plan.
    pub plan_price_id: String,
    /// Subscription status.
    pub status: SubscriptionStatus,
    /// Current billing period start (Unix timestamp).
    pub current_period_start: u64,
    /// Current billing period end (Unix timestamp).
    pub current_period_end: u64,
    /// Whether subscription will cancel at period end.
    pub cancel_at_period_end: bool,
    /// Tenant whose referral led to this signup, if any.
    pub referrer_tenant_id: Option<String>,
    /// Created timestamp.
    pub created_at: u64,
    /// Last updated timestamp.
    pub updated_at: u64,
}

impl StoredSubscription {
    /// Whether the tenant is entitled under this subscription at `now`.
    #[must_use]
    pub fn is_entitled_at(&self, now: u64) -> bool {
        is_entitled(self.status, self.current_period_end, now)
    }

    /// Whether a new subscription may replace this one.
    ///
    /// Only subscriptions the provider will never bill again can be replaced.
    #[must_use]
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Canceled
                | SubscriptionStatus::IncompleteExpired
                | SubscriptionStatus::Unknown
        )
    }

    /// Check if the subscription will cancel at period end.
    #[must_use]
    pub fn will_cancel(&self) -> bool {
        self.cancel_at_period_end
    }
}

/// Derive entitlement from provider state.
///
/// A tenant is entitled while its subscription is active or trialing and
/// the current period has not ended.
#[must_use]
pub fn is_entitled(status: SubscriptionStatus, period_end: u64, now: u64) -> bool {
    status.is_entitling() && now < period_end
}

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active and paid.
    Active,
    /// Subscription is in trial period.
    Trialing,
    /// Payment failed, subscription still active but past due.
    PastDue,
    /// Subscription has been canceled.
    Canceled,
    /// Subscription is incomplete (awaiting payment).
    Incomplete,
    /// Subscription expired after incomplete payment.
    IncompleteExpired,
    /// Subscription is paused.
    Paused,
    /// Subscription is unpaid.
    Unpaid,
    /// Status string this version does not recognise.
    Unknown,
}

impl SubscriptionStatus {
    /// Parse a provider or stored status string.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            "unpaid" => Self::Unpaid,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unpaid => "unpaid",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses that grant entitlement (before period expiry is considered).
    #[must_use]
    pub fn is_entitling(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tenant (store account) as seen by the billing core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantAccount {
    pub tenant_id: String,
    /// Derived entitlement; controls whether the storefront is live.
    pub is_active: bool,
    /// Mirror of the current subscription's period start.
    pub subscription_start: Option<u64>,
    /// Mirror of the current subscription's period end.
    pub subscription_end: Option<u64>,
    /// Cached billing-provider customer.
    pub billing_customer_id: Option<String>,
    pub updated_at: u64,
}

impl TenantAccount {
    /// A new, inactive account with nothing mirrored.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, now: u64) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_active: false,
            subscription_start: None,
            subscription_end: None,
            billing_customer_id: None,
            updated_at: now,
        }
    }
}

/// A device registered against a tenant's concurrent-device cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub tenant_id: String,
    pub device_id: String,
    pub last_active_at: u64,
    pub created_at: u64,
}

impl ActiveSession {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, device_id: impl Into<String>, now: u64) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            last_active_at: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(status: SubscriptionStatus, period_end: u64) -> StoredSubscription {
        StoredSubscription {
            tenant_id: "t1".to_string(),
            external_subscription_id: "sub_1".to_string(),
            external_customer_id: "cus_1".to_string(),
            plan_name: "basic".to_string(),
            plan_price_id: "price_basic".to_string(),
            status,
            current_period_start: 0,
            current_period_end: period_end,
            cancel_at_period_end: false,
            referrer_tenant_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_subscription_status_parse() {
        assert_eq!(SubscriptionStatus::parse("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::parse("past_due"), SubscriptionStatus::PastDue);
        assert_eq!(
            SubscriptionStatus::parse("incomplete_expired"),
            SubscriptionStatus::IncompleteExpired
        );
        assert_eq!(SubscriptionStatus::parse("bogus"), SubscriptionStatus::Unknown);
    }

    #[test]
    fn test_status_round_trips_through_as_str() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Unknown,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        let json = serde_json::to_string(&SubscriptionStatus::PastDue).unwrap();
        assert_eq!(json, "\"past_due\"");
    }

    #[test]
    fn test_entitlement_requires_status_and_unexpired_period() {
        let now = 1_000;
        assert!(is_entitled(SubscriptionStatus::Active, 2_000, now));
        assert!(is_entitled(SubscriptionStatus::Trialing, 2_000, now));
        assert!(!is_entitled(SubscriptionStatus::Active, 999, now));
        // period end is exclusive
        assert!(!is_entitled(SubscriptionStatus::Active, 1_000, now));
        assert!(!is_entitled(SubscriptionStatus::PastDue, 2_000, now));
        assert!(!is_entitled(SubscriptionStatus::Incomplete, 2_000, now));
        assert!(!is_entitled(SubscriptionStatus::Unknown, 2_000, now));
    }

    #[test]
    fn test_replaceable_statuses() {
        assert!(!subscription(SubscriptionStatus::Active, 10).is_replaceable());
        assert!(!subscription(SubscriptionStatus::PastDue, 10).is_replaceable());
        assert!(!subscription(SubscriptionStatus::Incomplete, 10).is_replaceable());
        assert!(subscription(SubscriptionStatus::Canceled, 10).is_replaceable());
        assert!(subscription(SubscriptionStatus::IncompleteExpired, 10).is_replaceable());
    }

    #[test]
    fn test_cancel_does_not_affect_entitlement() {
        let mut sub = subscription(SubscriptionStatus::Active, 2_000);
        sub.cancel_at_period_end = true;
        assert!(sub.will_cancel());
        assert!(sub.is_entitled_at(1_000));
        assert!(!sub.is_entitled_at(2_500));
    }
}
