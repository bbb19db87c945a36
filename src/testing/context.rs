//! A fully wired in-memory deployment for tests.

use std::sync::Arc;

use axum::Router;

use crate::billing::{
    BillingAuditLogger, BillingProvider, DynSubscriptionManager, InMemoryTenantStore, Plans,
    RecordingAuditLogger, SandboxBillingProvider, StoredSubscription, SubscriptionManager,
    TenantStore,
};
use crate::config::DeviceConfig;
use crate::devices::{DeviceSessionGuard, DynDeviceGuard};
use crate::http::{self, AppState};
use crate::inventory::{InMemoryInventory, InventoryVisibility};
use crate::reconcile::ReconcileStatus;

/// Payment method the sandbox provider accepts.
pub const TEST_PAYMENT_METHOD: &str = "pm_card_visa";

/// Plans used throughout the tests.
///
/// | plan    | price         | devices   |
/// |---------|---------------|-----------|
/// | `basic` | `price_basic` | 2         |
/// | `pro`   | `price_pro`   | 5         |
/// | `free`  | `price_free`  | unlimited |
#[must_use]
pub fn test_plans() -> Plans {
    Plans::builder()
        .plan("basic")
        .stripe_price("price_basic")
        .max_users(2)
        .display_name("Basic")
        .done()
        .plan("pro")
        .stripe_price("price_pro")
        .max_users(5)
        .display_name("Pro")
        .done()
        .plan("free")
        .stripe_price("price_free")
        .free_tier()
        .done()
        .build()
}

/// In-memory store, sandbox provider and inventory behind a real manager and guard.
///
/// The concrete backends are kept alongside so tests can seed state, inject
/// failures and inspect call counts.
pub struct TestContext {
    pub store: InMemoryTenantStore,
    pub provider: SandboxBillingProvider,
    pub inventory: InMemoryInventory,
    pub audit: RecordingAuditLogger,
    pub manager: Arc<DynSubscriptionManager>,
    pub guard: Arc<DynDeviceGuard>,
    pub reconcile_status: ReconcileStatus,
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_plans(test_plans())
    }

    #[must_use]
    pub fn with_plans(plans: Plans) -> Self {
        let store = InMemoryTenantStore::new();
        let provider = SandboxBillingProvider::new();
        let inventory = InMemoryInventory::new();
        let audit = RecordingAuditLogger::new();

        let shared_store: Arc<dyn TenantStore> = Arc::new(store.clone());
        let shared_audit: Arc<dyn BillingAuditLogger> = Arc::new(audit.clone());
        let shared_provider: Arc<dyn BillingProvider> = Arc::new(provider.clone());
        let shared_inventory: Arc<dyn InventoryVisibility> = Arc::new(inventory.clone());

        let manager = SubscriptionManager::new(
            shared_store.clone(),
            shared_provider,
            shared_inventory,
            plans.clone(),
        )
        .with_audit_logger(shared_audit.clone());
        let guard = DeviceSessionGuard::new(shared_store, plans).with_audit_logger(shared_audit);

        Self {
            store,
            provider,
            inventory,
            audit,
            manager: Arc::new(manager),
            guard: Arc::new(guard),
            reconcile_status: ReconcileStatus::new(),
        }
    }

    /// Subscribe `tenant_id` to `price_id` through the manager.
    ///
    /// # Panics
    ///
    /// Panics if the subscription cannot be created.
    pub async fn subscribe(&self, tenant_id: &str, price_id: &str) -> StoredSubscription {
        self.manager
            .create_subscription(tenant_id, price_id, TEST_PAYMENT_METHOD, None)
            .await
            .unwrap_or_else(|e| panic!("failed to subscribe {}: {}", tenant_id, e))
    }

    /// The tenant's stored subscription.
    ///
    /// # Panics
    ///
    /// Panics if the tenant has none.
    pub async fn store_subscription(&self, tenant_id: &str) -> StoredSubscription {
        self.store
            .find_subscription_by_tenant(tenant_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| panic!("no subscription stored for {}", tenant_id))
    }

    /// Whether the tenant is currently marked active.
    pub async fn is_active(&self, tenant_id: &str) -> bool {
        matches!(self.store.get_tenant(tenant_id).await, Ok(Some(t)) if t.is_active)
    }

    /// Handler state with insecure cookies, suitable for plain-HTTP tests.
    #[must_use]
    pub fn state(&self) -> AppState {
        let devices = DeviceConfig {
            cookie_secure: false,
            ..DeviceConfig::default()
        };
        AppState::new(
            self.manager.clone(),
            self.guard.clone(),
            devices,
            self.reconcile_status.clone(),
        )
    }

    /// The full router over [`state`](Self::state).
    #[must_use]
    pub fn router(&self) -> Router {
        http::router(self.state())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
