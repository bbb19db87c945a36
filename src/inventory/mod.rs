//! Inventory visibility call-outs.
//!
//! When a tenant loses entitlement its listed products are archived (hidden
//! from the storefront); when entitlement returns they are unarchived. The
//! subscription manager invokes these once per detected transition. Every
//! backend must treat a repeated call as a no-op, since overlapping sweeps
//! may deliver the same transition twice.

mod memory;
#[cfg(feature = "database")]
pub mod sea_orm_store;
mod webhook;

pub use memory::InMemoryInventory;
#[cfg(feature = "database")]
pub use sea_orm_store::SeaOrmInventory;
pub use webhook::{StorefrontWebhookInventory, WebhookInventoryConfig};

use async_trait::async_trait;

use crate::error::Result;

/// Archive or restore all of a tenant's listed products.
#[async_trait]
pub trait InventoryVisibility: Send + Sync {
    /// Hide every product the tenant has listed. Returns how many changed.
    async fn archive_all_products(&self, tenant_id: &str) -> Result<u64>;

    /// Restore every archived product. Returns how many changed.
    async fn unarchive_all_products(&self, tenant_id: &str) -> Result<u64>;
}

#[async_trait]
impl<T: InventoryVisibility + ?Sized> InventoryVisibility for std::sync::Arc<T> {
    async fn archive_all_products(&self, tenant_id: &str) -> Result<u64> {
        (**self).archive_all_products(tenant_id).await
    }

    async fn unarchive_all_products(&self, tenant_id: &str) -> Result<u64> {
        (**self).unarchive_all_products(tenant_id).await
    }
}

/// Direction of a visibility change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityAction {
    Archive,
    Unarchive,
}

impl VisibilityAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Unarchive => "unarchive",
        }
    }
}
