//! Subscription lifecycle and entitlement.
//!
//! [`SubscriptionManager`] is the single authority that turns billing
//! provider state into tenant entitlement. It mediates plan changes and
//! cancellation, and its [`reconcile_all`](SubscriptionManager::reconcile_all)
//! sweep re-derives every tenant's `is_active` flag from provider truth,
//! archiving or restoring inventory exactly once per transition.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::audit::{BillingAuditEvent, BillingAuditLogger, TracingAuditLogger};
use super::error::BillingError;
use super::plans::{PlanConfig, Plans};
use super::provider::{BillingProvider, CreateSubscriptionRequest, ProviderSubscription};
use super::storage::{StoredSubscription, TenantStore};
use super::validation::{validate_provider_id, validate_tenant_id};
use crate::error::Result;
use crate::inventory::InventoryVisibility;
use crate::utils::unix_now;

/// Subscription management operations.
///
/// Generic over its collaborators so tests and production can plug in
/// different stores, providers and inventory backends.
pub struct SubscriptionManager<S, P, I, A = TracingAuditLogger>
where
    S: TenantStore,
    P: BillingProvider,
    I: InventoryVisibility,
    A: BillingAuditLogger,
{
    store: S,
    provider: P,
    inventory: I,
    plans: Plans,
    audit: A,
}

/// Manager over trait objects, as assembled by the binary and HTTP layer.
pub type DynSubscriptionManager = SubscriptionManager<
    Arc<dyn TenantStore>,
    Arc<dyn BillingProvider>,
    Arc<dyn InventoryVisibility>,
    Arc<dyn BillingAuditLogger>,
>;

impl<S, P, I> SubscriptionManager<S, P, I>
where
    S: TenantStore,
    P: BillingProvider,
    I: InventoryVisibility,
{
    /// Create a new subscription manager that audits to `tracing`.
    #[must_use]
    pub fn new(store: S, provider: P, inventory: I, plans: Plans) -> Self {
        Self {
            store,
            provider,
            inventory,
            plans,
            audit: TracingAuditLogger,
        }
    }
}

impl<S, P, I, A> SubscriptionManager<S, P, I, A>
where
    S: TenantStore,
    P: BillingProvider,
    I: InventoryVisibility,
    A: BillingAuditLogger,
{
    /// Replace the audit logger.
    #[must_use]
    pub fn with_audit_logger<B: BillingAuditLogger>(
        self,
        audit: B,
    ) -> SubscriptionManager<S, P, I, B> {
        SubscriptionManager {
            store: self.store,
            provider: self.provider,
            inventory: self.inventory,
            plans: self.plans,
            audit,
        }
    }

    /// The tenant store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Configured plans.
    pub fn plans(&self) -> &Plans {
        &self.plans
    }

    /// Get the tenant's current subscription.
    ///
    /// With `force_sync`, the provider's copy is fetched first and its
    /// status, period and cancellation flag overwrite the local mirror; the
    /// tenant's entitlement is recomputed in the same step. Returns
    /// `Ok(None)` for tenants without a subscription (e.g. free tier).
    pub async fn get_subscription(
        &self,
        tenant_id: &str,
        force_sync: bool,
    ) -> Result<Option<StoredSubscription>> {
        validate_tenant_id(tenant_id)?;

        let Some(record) = self.store.find_subscription_by_tenant(tenant_id).await? else {
            return Ok(None);
        };
        if !force_sync {
            return Ok(Some(record));
        }

        let now = unix_now();
        let remote = self
            .provider
            .retrieve_subscription(&record.external_subscription_id)
            .await?
            .validated("retrieve_subscription")?;
        let merged = self.merge_provider_state(record, &remote, now);
        self.persist_interactive(&merged, now).await?;

        tracing::debug!(
            target: "consign::billing",
            tenant_id = %tenant_id,
            status = %merged.status,
            "subscription synced from provider"
        );
        Ok(Some(merged))
    }

    /// Subscribe a tenant to a plan.
    ///
    /// Rejects with `Conflict` while the tenant's current subscription can
    /// still bill, as reported by the provider. A canceled (or
    /// expired-incomplete) one is kept as history and replaced.
    /// `referrer_tenant_id` is recorded for audit; crediting the referral is
    /// the caller's business.
    pub async fn create_subscription(
        &self,
        tenant_id: &str,
        price_id: &str,
        payment_method_id: &str,
        referrer_tenant_id: Option<&str>,
    ) -> Result<StoredSubscription> {
        validate_tenant_id(tenant_id)?;
        validate_provider_id("price", price_id)?;
        validate_provider_id("payment_method", payment_method_id)?;
        if let Some(referrer) = referrer_tenant_id {
            validate_tenant_id(referrer)?;
            if referrer == tenant_id {
                return Err(BillingError::InvalidReferral {
                    reason: "a tenant cannot refer itself".to_string(),
                }
                .into());
            }
        }

        let plan = self.plan_for_price(price_id)?.clone();

        let existing = match self.store.find_subscription_by_tenant(tenant_id).await? {
            Some(current) if !current.is_replaceable() => {
                // The mirror may lag the provider until the next sweep.
                let remote = self
                    .provider
                    .retrieve_subscription(&current.external_subscription_id)
                    .await?
                    .validated("retrieve_subscription")?;
                let now = unix_now();
                let merged = self.merge_provider_state(current, &remote, now);
                self.persist_interactive(&merged, now).await?;

                if !merged.is_replaceable() {
                    return Err(BillingError::SubscriptionAlreadyActive {
                        tenant_id: tenant_id.to_string(),
                        status: merged.status.to_string(),
                    }
                    .into());
                }
                Some(merged)
            }
            other => other,
        };

        let customer_id = self.resolve_customer(tenant_id, existing.as_ref()).await?;

        let remote = self
            .provider
            .create_subscription(CreateSubscriptionRequest {
                customer_id,
                price_id: price_id.to_string(),
                payment_method_id: payment_method_id.to_string(),
                tenant_id: tenant_id.to_string(),
                referrer_tenant_id: referrer_tenant_id.map(str::to_string),
            })
            .await?
            .validated("create_subscription")?;

        if let Some(previous) = existing {
            self.store.record_superseded_subscription(&previous).await?;
            self.audit
                .log(BillingAuditEvent::SubscriptionSuperseded {
                    tenant_id: tenant_id.to_string(),
                    old_subscription_id: previous.external_subscription_id.clone(),
                    old_status: previous.status.to_string(),
                })
                .await;
        }

        let now = unix_now();
        let record = StoredSubscription {
            tenant_id: tenant_id.to_string(),
            external_subscription_id: remote.id,
            external_customer_id: remote.customer_id,
            plan_name: plan.id.clone(),
            plan_price_id: price_id.to_string(),
            status: remote.status,
            current_period_start: remote.current_period_start,
            current_period_end: remote.current_period_end,
            cancel_at_period_end: remote.cancel_at_period_end,
            referrer_tenant_id: referrer_tenant_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.persist_interactive(&record, now).await?;

        self.audit
            .log(BillingAuditEvent::SubscriptionCreated {
                tenant_id: tenant_id.to_string(),
                subscription_id: record.external_subscription_id.clone(),
                plan_price_id: record.plan_price_id.clone(),
                referrer_tenant_id: record.referrer_tenant_id.clone(),
            })
            .await;

        tracing::info!(
            target: "consign::billing",
            tenant_id = %tenant_id,
            subscription_id = %record.external_subscription_id,
            plan = %record.plan_name,
            status = %record.status,
            "subscription created"
        );
        Ok(record)
    }

    /// Swap the tenant's plan using the provider's native plan swap.
    ///
    /// Changing to the current price is a no-op: no provider call is made
    /// and the current record is returned.
    pub async fn change_subscription(
        &self,
        tenant_id: &str,
        new_price_id: &str,
    ) -> Result<StoredSubscription> {
        validate_tenant_id(tenant_id)?;
        validate_provider_id("price", new_price_id)?;

        let record = self.require_subscription(tenant_id).await?;
        if record.plan_price_id == new_price_id {
            tracing::debug!(
                target: "consign::billing",
                tenant_id = %tenant_id,
                price_id = %new_price_id,
                "plan unchanged, skipping provider call"
            );
            return Ok(record);
        }

        let plan = self.plan_for_price(new_price_id)?.clone();
        let from_price_id = record.plan_price_id.clone();

        let remote = self
            .provider
            .update_subscription_plan(&record.external_subscription_id, new_price_id)
            .await?
            .validated("update_subscription_plan")?;

        let now = unix_now();
        let mut updated = self.merge_provider_state(record, &remote, now);
        updated.plan_price_id = new_price_id.to_string();
        updated.plan_name = plan.id.clone();
        self.persist_interactive(&updated, now).await?;

        self.audit
            .log(BillingAuditEvent::PlanChanged {
                tenant_id: tenant_id.to_string(),
                subscription_id: updated.external_subscription_id.clone(),
                from_price_id,
                to_price_id: new_price_id.to_string(),
            })
            .await;

        tracing::info!(
            target: "consign::billing",
            tenant_id = %tenant_id,
            plan = %updated.plan_name,
            "subscription plan changed"
        );
        Ok(updated)
    }

    /// Schedule the tenant's subscription to end at the close of its period.
    ///
    /// Only the cancellation flag is mirrored locally; status and the
    /// tenant's entitlement stay as they are until the period ends and a
    /// sweep observes it.
    pub async fn cancel_subscription(&self, tenant_id: &str) -> Result<StoredSubscription> {
        validate_tenant_id(tenant_id)?;

        let mut record = self.require_subscription(tenant_id).await?;
        if record.will_cancel() {
            return Ok(record);
        }

        let remote = self
            .provider
            .cancel_at_period_end(&record.external_subscription_id)
            .await?
            .validated("cancel_at_period_end")?;

        record.cancel_at_period_end = remote.cancel_at_period_end;
        record.updated_at = unix_now();
        self.store.upsert_subscription(&record).await?;

        self.audit
            .log(BillingAuditEvent::CancellationScheduled {
                tenant_id: tenant_id.to_string(),
                subscription_id: record.external_subscription_id.clone(),
                period_end: record.current_period_end,
            })
            .await;

        tracing::info!(
            target: "consign::billing",
            tenant_id = %tenant_id,
            period_end = record.current_period_end,
            "subscription set to cancel at period end"
        );
        Ok(record)
    }

    /// Subscriptions the tenant had before its current one, oldest first.
    pub async fn subscription_history(&self, tenant_id: &str) -> Result<Vec<StoredSubscription>> {
        validate_tenant_id(tenant_id)?;
        self.store.list_superseded_subscriptions(tenant_id).await
    }

    /// Reconcile every stored subscription against the provider.
    ///
    /// Tenants are processed one at a time. A failure for one tenant is
    /// logged and counted in [`ReconcileSummary::errors`]; it never aborts
    /// the sweep. Only failing to list subscriptions fails the whole call.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary> {
        self.reconcile_all_at(unix_now()).await
    }

    /// [`reconcile_all`](Self::reconcile_all) with an explicit clock.
    pub async fn reconcile_all_at(&self, now: u64) -> Result<ReconcileSummary> {
        let started = Instant::now();
        let records = self.store.list_all_subscriptions().await?;
        let mut summary = ReconcileSummary::default();

        for record in records {
            summary.considered += 1;
            let tenant_id = record.tenant_id.clone();

            match self.reconcile_one(record, now).await {
                Ok(transition) => {
                    summary.updated += 1;
                    match transition {
                        Transition::Activated => {
                            summary.activated += 1;
                            summary.products_unarchived += 1;
                        }
                        Transition::Deactivated => {
                            summary.deactivated += 1;
                            summary.products_archived += 1;
                        }
                        Transition::Unchanged { .. } => {}
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(
                        target: "consign::reconcile",
                        tenant_id = %tenant_id,
                        error = %e,
                        "failed to reconcile tenant"
                    );
                }
            }
        }

        tracing::info!(
            target: "consign::reconcile",
            considered = summary.considered,
            updated = summary.updated,
            activated = summary.activated,
            deactivated = summary.deactivated,
            errors = summary.errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// Retrieve, merge, compute entitlement, flip inventory, persist.
    ///
    /// Nothing is written if the inventory call fails, so the transition is
    /// seen again on the next sweep.
    async fn reconcile_one(&self, record: StoredSubscription, now: u64) -> Result<Transition> {
        let remote = self
            .provider
            .retrieve_subscription(&record.external_subscription_id)
            .await?
            .validated("retrieve_subscription")?;
        let merged = self.merge_provider_state(record, &remote, now);

        let transition = self.transition_for(&merged, now).await?;
        if transition.is_change() {
            self.apply_visibility(&merged.tenant_id, transition).await?;
        }
        self.store
            .save_reconciled(&merged, transition.is_active())
            .await?;
        if transition.is_change() {
            self.audit_entitlement(&merged.tenant_id, transition).await;
        }
        Ok(transition)
    }

    /// Persist a record from an interactive operation with its entitlement.
    ///
    /// If the inventory call fails, the subscription is still stored but the
    /// entitlement flag is left alone; the next sweep retries the transition.
    async fn persist_interactive(
        &self,
        record: &StoredSubscription,
        now: u64,
    ) -> Result<Transition> {
        let transition = self.transition_for(record, now).await?;

        if transition.is_change() {
            if let Err(e) = self.apply_visibility(&record.tenant_id, transition).await {
                tracing::warn!(
                    target: "consign::billing",
                    tenant_id = %record.tenant_id,
                    error = %e,
                    "inventory update failed, entitlement change deferred to next sweep"
                );
                self.store.upsert_subscription(record).await?;
                return Ok(Transition::Unchanged {
                    active: !transition.is_active(),
                });
            }
        }

        self.store
            .save_reconciled(record, transition.is_active())
            .await?;
        if transition.is_change() {
            self.audit_entitlement(&record.tenant_id, transition).await;
        }
        Ok(transition)
    }

    async fn transition_for(&self, record: &StoredSubscription, now: u64) -> Result<Transition> {
        let was_active = self
            .store
            .get_tenant(&record.tenant_id)
            .await?
            .is_some_and(|tenant| tenant.is_active);
        Ok(Transition::between(was_active, record.is_entitled_at(now)))
    }

    async fn apply_visibility(&self, tenant_id: &str, transition: Transition) -> Result<u64> {
        let affected = match transition {
            Transition::Deactivated => self.inventory.archive_all_products(tenant_id).await?,
            Transition::Activated => self.inventory.unarchive_all_products(tenant_id).await?,
            Transition::Unchanged { .. } => return Ok(0),
        };
        tracing::info!(
            target: "consign::billing",
            tenant_id = %tenant_id,
            active = transition.is_active(),
            products = affected,
            "tenant entitlement changed"
        );
        Ok(affected)
    }

    async fn audit_entitlement(&self, tenant_id: &str, transition: Transition) {
        self.audit
            .log(BillingAuditEvent::EntitlementChanged {
                tenant_id: tenant_id.to_string(),
                active: transition.is_active(),
            })
            .await;
    }

    /// Overwrite the provider-owned fields of a local record.
    fn merge_provider_state(
        &self,
        mut record: StoredSubscription,
        remote: &ProviderSubscription,
        now: u64,
    ) -> StoredSubscription {
        record.status = remote.status;
        record.current_period_start = remote.current_period_start;
        record.current_period_end = remote.current_period_end;
        record.cancel_at_period_end = remote.cancel_at_period_end;

        // Plans swapped on the provider's side are picked up if we know the price.
        if let Some(price_id) = remote.price_id.as_deref() {
            if price_id != record.plan_price_id {
                match self.plans.find_by_stripe_price(price_id) {
                    Some(plan) => {
                        record.plan_price_id = price_id.to_string();
                        record.plan_name = plan.id.clone();
                    }
                    None => tracing::warn!(
                        target: "consign::billing",
                        tenant_id = %record.tenant_id,
                        price_id = %price_id,
                        "provider reports a price with no configured plan, keeping local plan"
                    ),
                }
            }
        }

        record.updated_at = now;
        record
    }

    async fn require_subscription(&self, tenant_id: &str) -> Result<StoredSubscription> {
        self.store
            .find_subscription_by_tenant(tenant_id)
            .await?
            .ok_or_else(|| {
                BillingError::NoSubscription {
                    tenant_id: tenant_id.to_string(),
                }
                .into()
            })
    }

    fn plan_for_price(&self, price_id: &str) -> Result<&PlanConfig> {
        self.plans.find_by_stripe_price(price_id).ok_or_else(|| {
            BillingError::PlanNotFound {
                price_id: price_id.to_string(),
            }
            .into()
        })
    }

    /// Cached customer, else the previous subscription's, else a new one.
    async fn resolve_customer(
        &self,
        tenant_id: &str,
        previous: Option<&StoredSubscription>,
    ) -> Result<String> {
        if let Some(customer_id) = self
            .store
            .get_tenant(tenant_id)
            .await?
            .and_then(|tenant| tenant.billing_customer_id)
        {
            return Ok(customer_id);
        }
        if let Some(previous) = previous {
            let customer_id = previous.external_customer_id.clone();
            self.store
                .set_billing_customer_id(tenant_id, &customer_id)
                .await?;
            return Ok(customer_id);
        }

        let customer_id = self.provider.create_customer(tenant_id).await?;
        self.store
            .set_billing_customer_id(tenant_id, &customer_id)
            .await?;
        self.audit
            .log(BillingAuditEvent::CustomerCreated {
                tenant_id: tenant_id.to_string(),
                customer_id: customer_id.clone(),
            })
            .await;
        Ok(customer_id)
    }
}

/// How a tenant's entitlement moved in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Inactive to active; inventory is unarchived.
    Activated,
    /// Active to inactive; inventory is archived.
    Deactivated,
    /// No change.
    Unchanged { active: bool },
}

impl Transition {
    #[must_use]
    pub fn between(was_active: bool, now_active: bool) -> Self {
        match (was_active, now_active) {
            (false, true) => Self::Activated,
            (true, false) => Self::Deactivated,
            (_, active) => Self::Unchanged { active },
        }
    }

    /// Entitlement after the step.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Activated => true,
            Self::Deactivated => false,
            Self::Unchanged { active } => *active,
        }
    }

    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

/// Aggregate counters from one reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// Subscriptions looked at.
    pub considered: u64,
    /// Subscriptions whose reconciled state was persisted.
    pub updated: u64,
    /// Tenants that became entitled.
    pub activated: u64,
    /// Tenants that lost entitlement.
    pub deactivated: u64,
    /// Tenants that failed and were skipped.
    pub errors: u64,
    /// Tenants whose inventory was archived.
    pub products_archived: u64,
    /// Tenants whose inventory was unarchived.
    pub products_unarchived: u64,
}

impl ReconcileSummary {
    /// Whether every tenant reconciled cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::audit::RecordingAuditLogger;
    use crate::billing::memory::InMemoryTenantStore;
    use crate::billing::sandbox::{DECLINED_PAYMENT_METHOD, SandboxBillingProvider};
    use crate::billing::storage::{SubscriptionStatus, TenantAccount};
    use crate::error::ConsignError;
    use crate::inventory::InMemoryInventory;

    type TestManager = SubscriptionManager<
        InMemoryTenantStore,
        SandboxBillingProvider,
        InMemoryInventory,
        RecordingAuditLogger,
    >;

    struct Harness {
        manager: TestManager,
        store: InMemoryTenantStore,
        provider: SandboxBillingProvider,
        inventory: InMemoryInventory,
        audit: RecordingAuditLogger,
    }

    fn plans() -> Plans {
        Plans::builder()
            .plan("basic")
            .stripe_price("price_basic")
            .max_users(2)
            .done()
            .plan("pro")
            .stripe_price("price_pro")
            .max_users(5)
            .done()
            .build()
    }

    fn harness() -> Harness {
        let store = InMemoryTenantStore::new();
        let provider = SandboxBillingProvider::new();
        let inventory = InMemoryInventory::new();
        let audit = RecordingAuditLogger::new();
        let manager = SubscriptionManager::new(
            store.clone(),
            provider.clone(),
            inventory.clone(),
            plans(),
        )
        .with_audit_logger(audit.clone());
        Harness {
            manager,
            store,
            provider,
            inventory,
            audit,
        }
    }

    /// Seed a tenant whose local mirror and provider copy agree.
    async fn seed(
        h: &Harness,
        tenant_id: &str,
        sub_id: &str,
        status: SubscriptionStatus,
        period_end: u64,
        active: bool,
    ) {
        let record = StoredSubscription {
            tenant_id: tenant_id.to_string(),
            external_subscription_id: sub_id.to_string(),
            external_customer_id: format!("cus_{}", tenant_id),
            plan_name: "basic".to_string(),
            plan_price_id: "price_basic".to_string(),
            status,
            current_period_start: period_end.saturating_sub(30 * 86_400),
            current_period_end: period_end,
            cancel_at_period_end: false,
            referrer_tenant_id: None,
            created_at: 0,
            updated_at: 0,
        };
        h.store.seed_subscription(record.clone()).await.unwrap();
        let mut tenant = TenantAccount::new(tenant_id, 0);
        tenant.is_active = active;
        tenant.subscription_start = Some(record.current_period_start);
        tenant.subscription_end = Some(record.current_period_end);
        h.store.seed_tenant(tenant).await;
        h.provider
            .insert_subscription(ProviderSubscription {
                id: sub_id.to_string(),
                customer_id: record.external_customer_id,
                price_id: Some("price_basic".to_string()),
                status,
                current_period_start: record.current_period_start,
                current_period_end: period_end,
                cancel_at_period_end: false,
            })
            .await;
    }

    async fn is_active(h: &Harness, tenant_id: &str) -> bool {
        h.store
            .get_tenant(tenant_id)
            .await
            .unwrap()
            .is_some_and(|t| t.is_active)
    }

    #[tokio::test]
    async fn test_get_subscription_none_for_unsubscribed_tenant() {
        let h = harness();
        assert!(h.manager.get_subscription("t1", false).await.unwrap().is_none());
        assert!(h.manager.get_subscription("t1", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_subscription_force_sync_overwrites_provider_fields() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now + 86_400, true).await;
        h.provider
            .modify_subscription("sub_1", |s| {
                s.status = SubscriptionStatus::PastDue;
                s.cancel_at_period_end = true;
            })
            .await;

        let cached = h.manager.get_subscription("t1", false).await.unwrap().unwrap();
        assert_eq!(cached.status, SubscriptionStatus::Active);
        assert_eq!(h.provider.call_count("retrieve_subscription").await, 0);

        let synced = h.manager.get_subscription("t1", true).await.unwrap().unwrap();
        assert_eq!(synced.status, SubscriptionStatus::PastDue);
        assert!(synced.cancel_at_period_end);
        assert!(!is_active(&h, "t1").await);
        assert_eq!(h.inventory.archive_calls("t1").await, 1);
    }

    #[tokio::test]
    async fn test_create_subscription_activates_tenant() {
        let h = harness();
        h.inventory.seed_products("t1", 3).await;

        let record = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", Some("t9"))
            .await
            .unwrap();

        assert_eq!(record.plan_name, "basic");
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.referrer_tenant_id.as_deref(), Some("t9"));
        assert!(is_active(&h, "t1").await);
        assert_eq!(h.inventory.unarchive_calls("t1").await, 1);

        let tenant = h.store.get_tenant("t1").await.unwrap().unwrap();
        assert_eq!(tenant.subscription_end, Some(record.current_period_end));
        assert_eq!(
            tenant.billing_customer_id.as_deref(),
            Some(record.external_customer_id.as_str())
        );

        assert_eq!(
            h.audit.kinds().await,
            vec!["customer_created", "entitlement_changed", "subscription_created"]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_while_subscription_is_live() {
        let h = harness();
        h.manager
            .create_subscription("t1", "price_basic", "pm_card_visa", None)
            .await
            .unwrap();

        let err = h
            .manager
            .create_subscription("t1", "price_pro", "pm_card_visa", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsignError::Conflict(_)));
        assert_eq!(h.provider.call_count("create_subscription").await, 1);
        assert_eq!(h.provider.call_count("retrieve_subscription").await, 1);
    }

    #[tokio::test]
    async fn test_create_checks_provider_before_conflict() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_old", SubscriptionStatus::Active, now + 86_400, true).await;
        // Ended at the provider; the local mirror has not been swept.
        h.provider
            .modify_subscription("sub_old", |s| s.status = SubscriptionStatus::Canceled)
            .await;

        let record = h
            .manager
            .create_subscription("t1", "price_pro", "pm_card_visa", None)
            .await
            .unwrap();

        assert_ne!(record.external_subscription_id, "sub_old");
        assert!(is_active(&h, "t1").await);
        let history = h.manager.subscription_history("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn test_create_conflict_check_fails_when_provider_unreachable() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_old", SubscriptionStatus::Active, now + 86_400, true).await;
        h.provider.fail_subscription("sub_old").await;

        let err = h
            .manager
            .create_subscription("t1", "price_pro", "pm_card_visa", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ConsignError::Upstream(_)));
        assert_eq!(h.provider.call_count("create_subscription").await, 0);
    }

    #[tokio::test]
    async fn test_create_supersedes_canceled_subscription() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_old", SubscriptionStatus::Canceled, now - 10, false).await;

        let record = h
            .manager
            .create_subscription("t1", "price_pro", "pm_card_visa", None)
            .await
            .unwrap();
        assert_ne!(record.external_subscription_id, "sub_old");
        // The old customer is reused rather than creating another.
        assert_eq!(record.external_customer_id, "cus_t1");
        assert_eq!(h.provider.call_count("create_customer").await, 0);

        let history = h.manager.subscription_history("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].external_subscription_id, "sub_old");

        let all = h.store.list_all_subscriptions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(h.audit.kinds().await.contains(&"subscription_superseded"));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let h = harness();

        let err = h
            .manager
            .create_subscription("t1", "price_unknown", "pm_card_visa", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsignError::BadRequest(_)));

        let err = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", Some("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsignError::BadRequest(_)));

        let err = h
            .manager
            .create_subscription("", "price_basic", "pm_card_visa", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsignError::BadRequest(_)));

        assert_eq!(h.provider.call_count("create_customer").await, 0);
    }

    #[tokio::test]
    async fn test_declined_card_leaves_no_subscription() {
        let h = harness();
        let err = h
            .manager
            .create_subscription("t1", "price_basic", DECLINED_PAYMENT_METHOD, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsignError::BadRequest(_)));
        assert!(h.manager.get_subscription("t1", false).await.unwrap().is_none());
        assert!(!is_active(&h, "t1").await);
    }

    #[tokio::test]
    async fn test_change_to_same_price_is_noop() {
        let h = harness();
        let created = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", None)
            .await
            .unwrap();

        let unchanged = h.manager.change_subscription("t1", "price_basic").await.unwrap();
        assert_eq!(unchanged, created);
        assert_eq!(h.provider.call_count("update_subscription_plan").await, 0);
    }

    #[tokio::test]
    async fn test_change_subscription_swaps_plan() {
        let h = harness();
        let created = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", None)
            .await
            .unwrap();

        let changed = h.manager.change_subscription("t1", "price_pro").await.unwrap();
        assert_eq!(changed.plan_name, "pro");
        assert_eq!(changed.plan_price_id, "price_pro");
        assert_eq!(changed.current_period_end, created.current_period_end);
        assert!(is_active(&h, "t1").await);
        assert!(h.audit.kinds().await.contains(&"plan_changed"));
    }

    #[tokio::test]
    async fn test_change_and_cancel_require_subscription() {
        let h = harness();
        let err = h.manager.change_subscription("t1", "price_pro").await.unwrap_err();
        assert!(matches!(err, ConsignError::NotFound(_)));
        let err = h.manager.cancel_subscription("t1").await.unwrap_err();
        assert!(matches!(err, ConsignError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_keeps_entitlement_until_period_end() {
        let h = harness();
        let created = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", None)
            .await
            .unwrap();

        let canceled = h.manager.cancel_subscription("t1").await.unwrap();
        assert!(canceled.cancel_at_period_end);
        assert_eq!(canceled.status, created.status);
        assert!(is_active(&h, "t1").await);

        // Cancelling again does not call the provider.
        h.manager.cancel_subscription("t1").await.unwrap();
        assert_eq!(h.provider.call_count("cancel_at_period_end").await, 1);

        let summary = h
            .manager
            .reconcile_all_at(created.current_period_end + 1)
            .await
            .unwrap();
        assert_eq!(summary.deactivated, 1);
        assert!(!is_active(&h, "t1").await);
    }

    #[tokio::test]
    async fn test_reconcile_expired_subscription() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now - 86_400, true).await;

        let summary = h.manager.reconcile_all().await.unwrap();
        assert_eq!(summary.considered, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deactivated, 1);
        assert_eq!(summary.products_archived, 1);
        assert_eq!(summary.errors, 0);
        assert!(!is_active(&h, "t1").await);
        assert_eq!(h.inventory.archive_calls("t1").await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now - 86_400, true).await;
        seed(&h, "t2", "sub_2", SubscriptionStatus::Active, now + 86_400, false).await;

        let first = h.manager.reconcile_all().await.unwrap();
        assert_eq!(first.activated, 1);
        assert_eq!(first.deactivated, 1);

        let calls = h.inventory.total_calls().await;
        let second = h.manager.reconcile_all().await.unwrap();
        assert_eq!(second.activated, 0);
        assert_eq!(second.deactivated, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(h.inventory.total_calls().await, calls);
        assert!(!is_active(&h, "t1").await);
        assert!(is_active(&h, "t2").await);
    }

    #[tokio::test]
    async fn test_reconcile_isolates_failures() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now - 86_400, true).await;
        seed(&h, "t2", "sub_2", SubscriptionStatus::Active, now - 86_400, true).await;
        seed(&h, "t3", "sub_3", SubscriptionStatus::Active, now - 86_400, true).await;
        h.provider.fail_subscription("sub_1").await;
        h.inventory.fail_for("t2").await;

        let summary = h.manager.reconcile_all().await.unwrap();
        assert_eq!(summary.considered, 3);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.deactivated, 1);

        // Nothing was persisted for the failed tenants, so the next run retries.
        assert!(is_active(&h, "t1").await);
        assert!(is_active(&h, "t2").await);
        assert!(!is_active(&h, "t3").await);

        h.provider.clear_failures().await;
        h.inventory.clear_failures().await;
        let retry = h.manager.reconcile_all().await.unwrap();
        assert_eq!(retry.deactivated, 2);
        assert_eq!(retry.errors, 0);
    }

    #[tokio::test]
    async fn test_reconcile_counts_persistence_errors() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now + 86_400, true).await;
        h.store.fail_writes_for("t1").await;

        let summary = h.manager.reconcile_all().await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn test_reconcile_picks_up_provider_side_plan_swap() {
        let h = harness();
        let now = unix_now();
        seed(&h, "t1", "sub_1", SubscriptionStatus::Active, now + 86_400, true).await;
        h.provider
            .modify_subscription("sub_1", |s| s.price_id = Some("price_pro".to_string()))
            .await;

        h.manager.reconcile_all().await.unwrap();
        let record = h.manager.get_subscription("t1", false).await.unwrap().unwrap();
        assert_eq!(record.plan_name, "pro");
    }

    #[tokio::test]
    async fn test_inventory_failure_defers_interactive_transition() {
        let h = harness();
        h.inventory.fail_for("t1").await;

        let record = h
            .manager
            .create_subscription("t1", "price_basic", "pm_card_visa", None)
            .await
            .unwrap();
        assert!(h.manager.get_subscription("t1", false).await.unwrap().is_some());
        assert!(!is_active(&h, "t1").await);

        h.inventory.clear_failures().await;
        let summary = h.manager.reconcile_all().await.unwrap();
        assert_eq!(summary.activated, 1);
        assert!(is_active(&h, "t1").await);
        assert_eq!(record.status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_transition_between() {
        assert_eq!(Transition::between(false, true), Transition::Activated);
        assert_eq!(Transition::between(true, false), Transition::Deactivated);
        assert_eq!(
            Transition::between(true, true),
            Transition::Unchanged { active: true }
        );
        assert!(!Transition::between(false, false).is_active());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = ReconcileSummary {
            considered: 1,
            updated: 1,
            deactivated: 1,
            products_archived: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["productsArchived"], 1);
        assert_eq!(json["errors"], 0);
    }
}
