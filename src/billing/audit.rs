//! Audit logging for billing and device events.
//!
//! Every subscription mutation, entitlement flip and device decision is
//! emitted as a [`BillingAuditEvent`]. The default logger writes them to the
//! `billing::audit` tracing target.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Audit event types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingAuditEvent {
    /// Provider customer created for a tenant.
    CustomerCreated {
        tenant_id: String,
        customer_id: String,
    },
    /// Subscription created.
    SubscriptionCreated {
        tenant_id: String,
        subscription_id: String,
        plan_price_id: String,
        referrer_tenant_id: Option<String>,
    },
    /// An ended subscription was moved to history to make room for a new one.
    SubscriptionSuperseded {
        tenant_id: String,
        old_subscription_id: String,
        old_status: String,
    },
    /// Plan swapped on an existing subscription.
    PlanChanged {
        tenant_id: String,
        subscription_id: String,
        from_price_id: String,
        to_price_id: String,
    },
    /// Subscription set to end at period end.
    CancellationScheduled {
        tenant_id: String,
        subscription_id: String,
        period_end: u64,
    },
    /// Tenant entitlement flipped.
    EntitlementChanged { tenant_id: String, active: bool },
    /// New device took a session slot.
    DeviceRegistered {
        tenant_id: String,
        device_id: String,
        active_sessions: u64,
    },
    /// Login refused because the device cap was reached.
    DeviceRejected {
        tenant_id: String,
        device_id: String,
        limit: u32,
    },
    /// Device session removed by an administrator.
    DeviceRevoked { tenant_id: String, device_id: String },
}

impl BillingAuditEvent {
    /// Get the event kind as a string for structured logging.
    #[must_use]
    pub fn event_kind(&self) -> &'static str {
        match self {
            Self::CustomerCreated { .. } => "customer_created",
            Self::SubscriptionCreated { .. } => "subscription_created",
            Self::SubscriptionSuperseded { .. } => "subscription_superseded",
            Self::PlanChanged { .. } => "plan_changed",
            Self::CancellationScheduled { .. } => "cancellation_scheduled",
            Self::EntitlementChanged { .. } => "entitlement_changed",
            Self::DeviceRegistered { .. } => "device_registered",
            Self::DeviceRejected { .. } => "device_rejected",
            Self::DeviceRevoked { .. } => "device_revoked",
        }
    }

    /// Tenant the event belongs to.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        match self {
            Self::CustomerCreated { tenant_id, .. }
            | Self::SubscriptionCreated { tenant_id, .. }
            | Self::SubscriptionSuperseded { tenant_id, .. }
            | Self::PlanChanged { tenant_id, .. }
            | Self::CancellationScheduled { tenant_id, .. }
            | Self::EntitlementChanged { tenant_id, .. }
            | Self::DeviceRegistered { tenant_id, .. }
            | Self::DeviceRejected { tenant_id, .. }
            | Self::DeviceRevoked { tenant_id, .. } => tenant_id,
        }
    }
}

impl fmt::Display for BillingAuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CustomerCreated { tenant_id, customer_id } => {
                write!(f, "Customer created: tenant={}, customer={}", tenant_id, customer_id)
            }
            Self::SubscriptionCreated {
                tenant_id,
                subscription_id,
                plan_price_id,
                referrer_tenant_id,
            } => {
                write!(
                    f,
                    "Subscription created: tenant={}, sub={}, price={}",
                    tenant_id, subscription_id, plan_price_id
                )?;
                if let Some(referrer) = referrer_tenant_id {
                    write!(f, ", referrer={}", referrer)?;
                }
                Ok(())
            }
            Self::SubscriptionSuperseded {
                tenant_id,
                old_subscription_id,
                old_status,
            } => write!(
                f,
                "Subscription superseded: tenant={}, old_sub={}, old_status={}",
                tenant_id, old_subscription_id, old_status
            ),
            Self::PlanChanged {
                tenant_id,
                subscription_id,
                from_price_id,
                to_price_id,
            } => write!(
                f,
                "Plan changed: tenant={}, sub={}, from={}, to={}",
                tenant_id, subscription_id, from_price_id, to_price_id
            ),
            Self::CancellationScheduled {
                tenant_id,
                subscription_id,
                period_end,
            } => write!(
                f,
                "Cancellation scheduled: tenant={}, sub={}, period_end={}",
                tenant_id, subscription_id, period_end
            ),
            Self::EntitlementChanged { tenant_id, active } => {
                write!(f, "Entitlement changed: tenant={}, active={}", tenant_id, active)
            }
            Self::DeviceRegistered {
                tenant_id,
                device_id,
                active_sessions,
            } => write!(
                f,
                "Device registered: tenant={}, device={}, active_sessions={}",
                tenant_id, device_id, active_sessions
            ),
            Self::DeviceRejected {
                tenant_id,
                device_id,
                limit,
            } => write!(
                f,
                "Device rejected: tenant={}, device={}, limit={}",
                tenant_id, device_id, limit
            ),
            Self::DeviceRevoked { tenant_id, device_id } => {
                write!(f, "Device revoked: tenant={}, device={}", tenant_id, device_id)
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implement this trait to integrate with your logging system (e.g., database,
/// external service, file-based logging).
#[async_trait]
pub trait BillingAuditLogger: Send + Sync {
    /// Log an audit event.
    ///
    /// Implementations should handle failures themselves; logging never
    /// fails the operation that produced the event.
    async fn log(&self, event: BillingAuditEvent);
}

#[async_trait]
impl<T: BillingAuditLogger + ?Sized> BillingAuditLogger for Arc<T> {
    async fn log(&self, event: BillingAuditEvent) {
        (**self).log(event).await;
    }
}

/// No-op audit logger that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

#[async_trait]
impl BillingAuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: BillingAuditEvent) {}
}

/// Tracing-based audit logger.
///
/// Logs audit events using the `tracing` crate at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl BillingAuditLogger for TracingAuditLogger {
    async fn log(&self, event: BillingAuditEvent) {
        tracing::info!(
            target: "billing::audit",
            event_type = %event.event_kind(),
            tenant_id = %event.tenant_id(),
            "{}", event
        );
    }
}

/// Audit logger that keeps events in memory.
///
/// Clones share the same buffer, so a clone handed to a manager can be
/// inspected from the test that created it.
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLogger {
    events: Arc<Mutex<Vec<BillingAuditEvent>>>,
}

impl RecordingAuditLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    pub async fn events(&self) -> Vec<BillingAuditEvent> {
        self.events.lock().await.clone()
    }

    /// Event kinds recorded so far, in order.
    pub async fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .await
            .iter()
            .map(BillingAuditEvent::event_kind)
            .collect()
    }
}

#[async_trait]
impl BillingAuditLogger for RecordingAuditLogger {
    async fn log(&self, event: BillingAuditEvent) {
        self.events.lock().await.push(event);
    }
}
