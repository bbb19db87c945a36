use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{InventoryVisibility, VisibilityAction};
use crate::error::{ConsignError, Result};

/// In-memory product visibility.
///
/// Tracks per-tenant product counts and archived state, and counts calls so
/// tests can assert a transition triggered exactly one call-out.
#[derive(Clone, Default)]
pub struct InMemoryInventory {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    products: HashMap<String, u64>,
    archived: HashSet<String>,
    calls: Vec<(String, VisibilityAction)>,
    failing_tenants: HashSet<String>,
}

impl InMemoryInventory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give a tenant `count` listed products.
    pub async fn seed_products(&self, tenant_id: &str, count: u64) {
        self.inner
            .write()
            .await
            .products
            .insert(tenant_id.to_string(), count);
    }

    /// Whether the tenant's products are currently hidden.
    pub async fn is_archived(&self, tenant_id: &str) -> bool {
        self.inner.read().await.archived.contains(tenant_id)
    }

    /// Number of archive calls received for a tenant.
    pub async fn archive_calls(&self, tenant_id: &str) -> usize {
        self.count_calls(tenant_id, VisibilityAction::Archive).await
    }

    /// Number of unarchive calls received for a tenant.
    pub async fn unarchive_calls(&self, tenant_id: &str) -> usize {
        self.count_calls(tenant_id, VisibilityAction::Unarchive).await
    }

    /// Total calls of either kind across all tenants.
    pub async fn total_calls(&self) -> usize {
        self.inner.read().await.calls.len()
    }

    /// Make calls for this tenant fail.
    pub async fn fail_for(&self, tenant_id: &str) {
        self.inner
            .write()
            .await
            .failing_tenants
            .insert(tenant_id.to_string());
    }

    pub async fn clear_failures(&self) {
        self.inner.write().await.failing_tenants.clear();
    }

    async fn count_calls(&self, tenant_id: &str, action: VisibilityAction) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|(tenant, a)| tenant == tenant_id && *a == action)
            .count()
    }

    async fn apply(&self, tenant_id: &str, action: VisibilityAction) -> Result<u64> {
        let mut state = self.inner.write().await;
        state.calls.push((tenant_id.to_string(), action));

        if state.failing_tenants.contains(tenant_id) {
            return Err(ConsignError::upstream(format!(
                "inventory {} failed for tenant '{}'",
                action.as_str(),
                tenant_id
            )));
        }

        let count = state.products.get(tenant_id).copied().unwrap_or(0);
        let changed = match action {
            VisibilityAction::Archive => state.archived.insert(tenant_id.to_string()),
            VisibilityAction::Unarchive => state.archived.remove(tenant_id),
        };
        Ok(if changed { count } else { 0 })
    }
}

#[async_trait]
impl InventoryVisibility for InMemoryInventory {
    async fn archive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.apply(tenant_id, VisibilityAction::Archive).await
    }

    async fn unarchive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.apply(tenant_id, VisibilityAction::Unarchive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let inventory = InMemoryInventory::new();
        inventory.seed_products("t1", 12).await;

        assert_eq!(inventory.archive_all_products("t1").await.unwrap(), 12);
        assert_eq!(inventory.archive_all_products("t1").await.unwrap(), 0);
        assert!(inventory.is_archived("t1").await);
        assert_eq!(inventory.archive_calls("t1").await, 2);
    }

    #[tokio::test]
    async fn test_unarchive_restores() {
        let inventory = InMemoryInventory::new();
        inventory.seed_products("t1", 3).await;
        inventory.archive_all_products("t1").await.unwrap();

        assert_eq!(inventory.unarchive_all_products("t1").await.unwrap(), 3);
        assert!(!inventory.is_archived("t1").await);
        assert_eq!(inventory.unarchive_all_products("t1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection_records_call() {
        let inventory = InMemoryInventory::new();
        inventory.fail_for("t1").await;

        assert!(inventory.archive_all_products("t1").await.is_err());
        assert!(!inventory.is_archived("t1").await);
        assert_eq!(inventory.total_calls().await, 1);
    }
}
