//! In-memory tenant store.
//!
//! Suitable for development, tests, and single-instance demos. All state
//! lives behind one lock so multi-record writes such as
//! [`TenantStore::save_reconciled`] are atomic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::storage::{ActiveSession, StoredSubscription, TenantAccount, TenantStore};
use crate::error::{ConsignError, Result};
use crate::utils::unix_now;

/// In-memory tenant store.
///
/// Wraps data in Arc for cheap cloning.
#[derive(Default, Clone)]
pub struct InMemoryTenantStore {
    inner: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<String, StoredSubscription>,
    history: Vec<StoredSubscription>,
    tenants: HashMap<String, TenantAccount>,
    sessions: HashMap<(String, String), ActiveSession>,
    failing_tenants: HashSet<String>,
}

impl State {
    fn check_writable(&self, tenant_id: &str) -> Result<()> {
        if self.failing_tenants.contains(tenant_id) {
            return Err(ConsignError::persistence(format!(
                "write rejected for tenant '{}'",
                tenant_id
            )));
        }
        Ok(())
    }

    fn tenant_mut(&mut self, tenant_id: &str) -> &mut TenantAccount {
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantAccount::new(tenant_id, unix_now()))
    }

    fn write_subscription(&mut self, record: &StoredSubscription) -> Result<()> {
        let clashes = self.subscriptions.values().any(|existing| {
            existing.tenant_id != record.tenant_id
                && existing.external_subscription_id == record.external_subscription_id
        });
        if clashes {
            return Err(ConsignError::persistence(format!(
                "external subscription id '{}' already belongs to another tenant",
                record.external_subscription_id
            )));
        }

        self.subscriptions
            .insert(record.tenant_id.clone(), record.clone());

        let tenant = self.tenant_mut(&record.tenant_id);
        tenant.subscription_start = Some(record.current_period_start);
        tenant.subscription_end = Some(record.current_period_end);
        tenant.updated_at = unix_now();
        Ok(())
    }
}

impl InMemoryTenantStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant account.
    pub async fn seed_tenant(&self, account: TenantAccount) {
        self.inner
            .write()
            .await
            .tenants
            .insert(account.tenant_id.clone(), account);
    }

    /// Insert a subscription and mirror its period, bypassing failure injection.
    pub async fn seed_subscription(&self, record: StoredSubscription) -> Result<()> {
        self.inner.write().await.write_subscription(&record)
    }

    /// Make every write for this tenant fail with a persistence error.
    pub async fn fail_writes_for(&self, tenant_id: &str) {
        self.inner
            .write()
            .await
            .failing_tenants
            .insert(tenant_id.to_string());
    }

    /// Undo [`fail_writes_for`](Self::fail_writes_for).
    pub async fn clear_failures(&self) {
        self.inner.write().await.failing_tenants.clear();
    }

    /// Number of stored tenant accounts.
    pub async fn tenant_count(&self) -> usize {
        self.inner.read().await.tenants.len()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn find_subscription_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        Ok(self.inner.read().await.subscriptions.get(tenant_id).cloned())
    }

    async fn upsert_subscription(&self, record: &StoredSubscription) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(&record.tenant_id)?;
        state.write_subscription(record)
    }

    async fn list_all_subscriptions(&self) -> Result<Vec<StoredSubscription>> {
        let state = self.inner.read().await;
        let mut all: Vec<StoredSubscription> = state.subscriptions.values().cloned().collect();
        all.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(all)
    }

    async fn record_superseded_subscription(&self, record: &StoredSubscription) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(&record.tenant_id)?;
        state.history.push(record.clone());
        Ok(())
    }

    async fn list_superseded_subscriptions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<StoredSubscription>> {
        Ok(self
            .inner
            .read()
            .await
            .history
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantAccount>> {
        Ok(self.inner.read().await.tenants.get(tenant_id).cloned())
    }

    async fn set_tenant_active(&self, tenant_id: &str, is_active: bool) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(tenant_id)?;
        let tenant = state.tenant_mut(tenant_id);
        tenant.is_active = is_active;
        tenant.updated_at = unix_now();
        Ok(())
    }

    async fn set_billing_customer_id(&self, tenant_id: &str, customer_id: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(tenant_id)?;
        let tenant = state.tenant_mut(tenant_id);
        tenant.billing_customer_id = Some(customer_id.to_string());
        tenant.updated_at = unix_now();
        Ok(())
    }

    async fn save_reconciled(&self, record: &StoredSubscription, is_active: bool) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(&record.tenant_id)?;
        state.write_subscription(record)?;
        state.tenant_mut(&record.tenant_id).is_active = is_active;
        Ok(())
    }

    async fn count_active_sessions(&self, tenant_id: &str) -> Result<u64> {
        let state = self.inner.read().await;
        Ok(state
            .sessions
            .keys()
            .filter(|(tenant, _)| tenant == tenant_id)
            .count() as u64)
    }

    async fn find_active_session(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<ActiveSession>> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .get(&(tenant_id.to_string(), device_id.to_string()))
            .cloned())
    }

    async fn upsert_active_session(&self, session: &ActiveSession) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_writable(&session.tenant_id)?;
        state
            .sessions
            .entry((session.tenant_id.clone(), session.device_id.clone()))
            .and_modify(|existing| existing.last_active_at = session.last_active_at)
            .or_insert_with(|| session.clone());
        Ok(())
    }

    async fn list_active_sessions(&self, tenant_id: &str) -> Result<Vec<ActiveSession>> {
        let state = self.inner.read().await;
        let mut sessions: Vec<ActiveSession> = state
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    async fn delete_active_session(&self, tenant_id: &str, device_id: &str) -> Result<bool> {
        let mut state = self.inner.write().await;
        state.check_writable(tenant_id)?;
        Ok(state
            .sessions
            .remove(&(tenant_id.to_string(), device_id.to_string()))
            .is_some())
    }
}
