//! Plan-derived cap on concurrently registered devices.

use std::sync::Arc;

use serde::Serialize;

use crate::billing::{
    ActiveSession, BillingAuditEvent, BillingAuditLogger, Plans, TenantStore, TracingAuditLogger,
    validate_tenant_id,
};
use crate::error::{ConsignError, Result};
use crate::utils::unix_now;

/// Outcome of a login that was allowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "admission", rename_all = "snake_case")]
pub enum LoginAdmission {
    /// The tenant's plan has no device cap; nothing was recorded.
    Unrestricted,
    /// A known device logged in again; its session was refreshed.
    Refreshed,
    /// A new device took a free slot.
    Registered {
        #[serde(rename = "activeSessions")]
        active_sessions: u64,
    },
}

/// Enforces the device cap at login time.
///
/// The cap comes from the plan of the tenant's current subscription. A
/// downgrade never evicts sessions; it only blocks new devices until the
/// count drops below the new limit.
pub struct DeviceSessionGuard<S: TenantStore, A: BillingAuditLogger = TracingAuditLogger> {
    store: S,
    plans: Plans,
    audit: A,
}

/// Guard over trait objects, as assembled by the binary and HTTP layer.
pub type DynDeviceGuard = DeviceSessionGuard<Arc<dyn TenantStore>, Arc<dyn BillingAuditLogger>>;

impl<S: TenantStore> DeviceSessionGuard<S> {
    #[must_use]
    pub fn new(store: S, plans: Plans) -> Self {
        Self {
            store,
            plans,
            audit: TracingAuditLogger,
        }
    }
}

impl<S: TenantStore, A: BillingAuditLogger> DeviceSessionGuard<S, A> {
    /// Replace the audit logger.
    #[must_use]
    pub fn with_audit_logger<B: BillingAuditLogger>(self, audit: B) -> DeviceSessionGuard<S, B> {
        DeviceSessionGuard {
            store: self.store,
            plans: self.plans,
            audit,
        }
    }

    /// Admit or reject a login from `device_id`.
    ///
    /// # Errors
    ///
    /// `QuotaExceeded` when the device is new and the tenant is at its cap.
    pub async fn admit(&self, tenant_id: &str, device_id: &str) -> Result<LoginAdmission> {
        self.admit_at(tenant_id, device_id, unix_now()).await
    }

    pub(crate) async fn admit_at(
        &self,
        tenant_id: &str,
        device_id: &str,
        now: u64,
    ) -> Result<LoginAdmission> {
        validate_tenant_id(tenant_id)?;

        let Some(limit) = self.device_cap(tenant_id).await? else {
            return Ok(LoginAdmission::Unrestricted);
        };

        if let Some(mut session) = self.store.find_active_session(tenant_id, device_id).await? {
            session.last_active_at = now;
            self.store.upsert_active_session(&session).await?;
            tracing::debug!(
                target: "consign::devices",
                tenant_id = %tenant_id,
                "device session refreshed"
            );
            return Ok(LoginAdmission::Refreshed);
        }

        let active = self.store.count_active_sessions(tenant_id).await?;
        if active >= u64::from(limit) {
            tracing::info!(
                target: "consign::devices",
                tenant_id = %tenant_id,
                active_sessions = active,
                limit = limit,
                "login rejected: device limit reached"
            );
            self.audit
                .log(BillingAuditEvent::DeviceRejected {
                    tenant_id: tenant_id.to_string(),
                    device_id: device_id.to_string(),
                    limit,
                })
                .await;
            return Err(ConsignError::quota_exceeded(limit));
        }

        self.store
            .upsert_active_session(&ActiveSession::new(tenant_id, device_id, now))
            .await?;

        let active_sessions = active + 1;
        self.audit
            .log(BillingAuditEvent::DeviceRegistered {
                tenant_id: tenant_id.to_string(),
                device_id: device_id.to_string(),
                active_sessions,
            })
            .await;

        Ok(LoginAdmission::Registered { active_sessions })
    }

    /// A tenant's device sessions, most recently active first.
    pub async fn list_sessions(&self, tenant_id: &str) -> Result<Vec<ActiveSession>> {
        validate_tenant_id(tenant_id)?;
        self.store.list_active_sessions(tenant_id).await
    }

    /// Remove a device session, freeing its slot.
    ///
    /// # Errors
    ///
    /// `NotFound` if the tenant has no such session.
    pub async fn revoke(&self, tenant_id: &str, device_id: &str) -> Result<()> {
        validate_tenant_id(tenant_id)?;

        if !self.store.delete_active_session(tenant_id, device_id).await? {
            return Err(ConsignError::not_found(format!(
                "No device session '{}' for tenant '{}'",
                device_id, tenant_id
            )));
        }

        self.audit
            .log(BillingAuditEvent::DeviceRevoked {
                tenant_id: tenant_id.to_string(),
                device_id: device_id.to_string(),
            })
            .await;
        Ok(())
    }

    /// The tenant's device cap, or `None` when logins are not capped.
    async fn device_cap(&self, tenant_id: &str) -> Result<Option<u32>> {
        let Some(subscription) = self.store.find_subscription_by_tenant(tenant_id).await? else {
            return Ok(None);
        };

        match self.plans.find_by_stripe_price(&subscription.plan_price_id) {
            Some(plan) => Ok(plan.device_cap()),
            None => {
                tracing::warn!(
                    target: "consign::devices",
                    tenant_id = %tenant_id,
                    price_id = %subscription.plan_price_id,
                    "subscription price matches no configured plan; device cap not enforced"
                );
                Ok(None)
            }
        }
    }
}
