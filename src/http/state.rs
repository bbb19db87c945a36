use std::sync::Arc;

use secrecy::SecretString;

use crate::billing::DynSubscriptionManager;
use crate::config::DeviceConfig;
use crate::devices::DynDeviceGuard;
use crate::health::HealthChecker;
use crate::reconcile::ReconcileStatus;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<DynSubscriptionManager>,
    pub guard: Arc<DynDeviceGuard>,
    pub devices: DeviceConfig,
    /// Bearer token for `POST /internal/reconcile`; the route is closed without one.
    pub reconcile_token: Option<SecretString>,
    pub reconcile_status: ReconcileStatus,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(
        manager: Arc<DynSubscriptionManager>,
        guard: Arc<DynDeviceGuard>,
        devices: DeviceConfig,
        reconcile_status: ReconcileStatus,
    ) -> Self {
        let health = HealthChecker::new().with_reconciler(reconcile_status.clone());
        Self {
            manager,
            guard,
            devices,
            reconcile_token: None,
            reconcile_status,
            health: Arc::new(health),
        }
    }

    #[must_use]
    pub fn with_reconcile_token(mut self, token: Option<SecretString>) -> Self {
        self.reconcile_token = token;
        self
    }
}
