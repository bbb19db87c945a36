use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::signal;

use crate::billing::{
    BillingAuditLogger, BillingProvider, InMemoryTenantStore, Plans, SandboxBillingProvider,
    SubscriptionManager, TenantStore, TracingAuditLogger,
};
use crate::config::Config;
use crate::devices::DeviceSessionGuard;
use crate::http::{self, AppState};
use crate::inventory::{InMemoryInventory, InventoryVisibility};
use crate::middleware;
use crate::reconcile::{ReconcileStatus, ReconcileWorker};

/// A configured consign service: handlers, shared state and the reconciler.
pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Start assembling an app over `config`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// An app backed entirely by in-process implementations.
    ///
    /// Nothing is persisted and no money moves; useful for local runs and demos.
    pub fn in_memory(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handler state, e.g. to drive a sweep from outside the worker.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The router with state applied but without the serving middleware.
    pub fn into_test_router(self) -> Router {
        http::router(self.state)
    }

    /// Serve until Ctrl+C or SIGTERM, running the reconciler alongside when enabled.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let addr = self
            .config
            .server
            .addr()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let reconciler = if self.config.reconcile.enabled {
            let (worker, shutdown_rx) = ReconcileWorker::new(
                self.state.manager.clone(),
                self.state.reconcile_status.clone(),
                &self.config.reconcile,
            );
            Some(worker.spawn(shutdown_rx))
        } else {
            tracing::info!(target: "consign::reconcile", "reconcile worker disabled");
            None
        };

        let router = middleware::apply(http::router(self.state), &self.config.server);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("Server starting on http://{}", addr);
        tracing::info!("Health check available at http://{}/health", addr);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = reconciler {
            handle.shutdown().await;
        }
        tracing::info!("Shutdown complete");

        served
    }
}

/// Builder for [`App`]. Backends not supplied default to in-process ones.
#[must_use = "builder does nothing until you call build()"]
pub struct AppBuilder {
    config: Config,
    store: Option<Arc<dyn TenantStore>>,
    provider: Option<Arc<dyn BillingProvider>>,
    inventory: Option<Arc<dyn InventoryVisibility>>,
    audit: Option<Arc<dyn BillingAuditLogger>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            provider: None,
            inventory: None,
            audit: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn TenantStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn BillingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn inventory(mut self, inventory: Arc<dyn InventoryVisibility>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn audit_logger(mut self, audit: Arc<dyn BillingAuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> App {
        let plans = Plans::from_configs(self.config.billing.plans.clone());
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTenantStore::new()));
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(SandboxBillingProvider::new()));
        let inventory = self
            .inventory
            .unwrap_or_else(|| Arc::new(InMemoryInventory::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditLogger));

        let manager = SubscriptionManager::new(store.clone(), provider, inventory, plans.clone())
            .with_audit_logger(audit.clone());
        let guard = DeviceSessionGuard::new(store, plans).with_audit_logger(audit);

        let state = AppState::new(
            Arc::new(manager),
            Arc::new(guard),
            self.config.devices.clone(),
            ReconcileStatus::new(),
        )
        .with_reconcile_token(self.config.reconcile.trigger_token.clone());

        App {
            config: self.config,
            state,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give connections a grace period to close
    tokio::time::sleep(Duration::from_secs(1)).await;
}
