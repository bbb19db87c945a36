//! Subscription billing and tenant entitlement.
//!
//! Keeps a local mirror of each tenant's billing-provider subscription and
//! derives from it whether the tenant is entitled (its storefront is live).
//!
//! # Features
//!
//! - `stripe` - Enables the live Stripe provider ([`LiveStripeClient`])
//! - `database` - Enables the SeaORM tenant store ([`SeaOrmTenantStore`])
//!
//! # Example
//!
//! ```rust,ignore
//! use consign::billing::{
//!     InMemoryTenantStore, Plans, SandboxBillingProvider, SubscriptionManager,
//! };
//! use consign::inventory::InMemoryInventory;
//!
//! let plans = Plans::builder()
//!     .plan("basic")
//!         .stripe_price("price_basic")
//!         .max_users(2)
//!         .done()
//!     .plan("free")
//!         .stripe_price("price_free")
//!         .free_tier()
//!         .done()
//!     .build();
//!
//! let manager = SubscriptionManager::new(
//!     InMemoryTenantStore::new(),
//!     SandboxBillingProvider::new(),
//!     InMemoryInventory::new(),
//!     plans,
//! );
//!
//! manager
//!     .create_subscription("store_1", "price_basic", "pm_card_visa", None)
//!     .await?;
//!
//! // Periodically
//! let summary = manager.reconcile_all().await?;
//! ```

pub mod audit;
pub mod error;
#[cfg(feature = "stripe")]
pub mod live_client;
pub mod memory;
pub mod plans;
pub mod provider;
pub mod sandbox;
#[cfg(feature = "database")]
pub mod sea_orm_store;
pub mod storage;
pub mod subscription;
pub mod validation;

// Plan exports
pub use plans::{PlanBuilder, PlanConfig, Plans, PlansBuilder};

// Storage exports
pub use memory::InMemoryTenantStore;
pub use storage::{
    ActiveSession, StoredSubscription, SubscriptionStatus, TenantAccount, TenantStore, is_entitled,
};

// Provider exports
pub use provider::{
    BillingProvider, CreateSubscriptionRequest, ProviderResult, ProviderSubscription,
};
pub use sandbox::{DECLINED_PAYMENT_METHOD, SandboxBillingProvider};

// Subscription exports
pub use subscription::{DynSubscriptionManager, ReconcileSummary, SubscriptionManager, Transition};

// Audit exports
pub use audit::{
    BillingAuditEvent, BillingAuditLogger, NoOpAuditLogger, RecordingAuditLogger,
    TracingAuditLogger,
};

// Error exports
pub use error::BillingError;

// Live client exports (production Stripe client)
#[cfg(feature = "stripe")]
pub use live_client::{ApiKeyError, LiveStripeClient, LiveStripeClientConfig};

// SeaORM storage exports
#[cfg(feature = "database")]
pub use sea_orm_store::SeaOrmTenantStore;

// Validation exports
pub use validation::{validate_provider_id, validate_tenant_id};
