//! Consign - subscription lifecycle and entitlement core for resale storefronts
//!
//! Consign keeps each tenant's local subscription mirror in step with the
//! billing provider, derives whether the tenant's storefront is live, hides or
//! restores inventory when that changes, and caps how many devices may be
//! signed in on a plan.
//!
//! # Components
//!
//! - **Billing**: [`billing::SubscriptionManager`] over a [`billing::TenantStore`]
//!   and a [`billing::BillingProvider`] (live Stripe or an in-process sandbox)
//! - **Devices**: [`devices::DeviceSessionGuard`] enforcing plan device caps at login
//! - **Inventory**: [`inventory::InventoryVisibility`] archive/unarchive call-outs
//! - **Reconcile**: a periodic worker that runs the reconciliation sweep
//! - **HTTP**: axum routes, health checks, and in-process test scenarios
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use consign::{App, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     consign::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     let app = App::in_memory(config);
//!
//!     app.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod billing;
mod config;
mod core;
pub mod devices;
mod error;
pub mod health;
pub mod http;
pub mod inventory;
mod middleware;
pub mod reconcile;
pub mod testing;
pub mod utils;

// Re-exports for public API
pub use config::{
    BillingConfig, Config, ConfigBuilder, DatabaseConfig, DeviceConfig, InventoryConfig,
    LoggingConfig, ReconcileConfig, ServerConfig,
};
pub use crate::core::{App, AppBuilder};
pub use error::{ConsignError, ErrorResponse, Result};
pub use health::{ComponentHealth, HealthCheck, HealthChecker, HealthStatus};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in `main()`, before the app is built.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "consign::reconcile=debug")
/// - `CONSIGN_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = utils::get_env_flag("LOG_JSON").unwrap_or(false);
    install_subscriber(env_filter, json_logs);
}

/// Initialize tracing from a loaded [`Config`]
///
/// `RUST_LOG` still wins when set, so individual targets can be turned up
/// without changing the configured level.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    install_subscriber(env_filter, config.logging.json);
}

fn install_subscriber(env_filter: EnvFilter, json: bool) {
    // try_init: a second call (e.g. from tests) keeps the first subscriber
    if json {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }
}
