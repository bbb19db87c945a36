use std::sync::Arc;

use anyhow::Context;
use consign::billing::{BillingProvider, InMemoryTenantStore, SandboxBillingProvider, TenantStore};
use consign::inventory::{
    InMemoryInventory, InventoryVisibility, StorefrontWebhookInventory, WebhookInventoryConfig,
};
use consign::{App, Config, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .from_env()
        .build()
        .context("invalid configuration")?;
    consign::init_tracing_with_config(&config);

    #[cfg(feature = "database")]
    let db = connect_database(&config).await?;

    #[cfg(feature = "database")]
    let store: Arc<dyn TenantStore> = match &db {
        Some(conn) => {
            let store = consign::billing::SeaOrmTenantStore::new(conn.clone());
            store.create_schema().await.context("failed to create tables")?;
            tracing::info!("using database tenant store");
            Arc::new(store)
        }
        None => in_memory_store(),
    };
    #[cfg(not(feature = "database"))]
    let store = in_memory_store();

    let provider = billing_provider(&config)?;

    let inventory: Arc<dyn InventoryVisibility> = match &config.inventory.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "using storefront webhook inventory");
            Arc::new(StorefrontWebhookInventory::new(WebhookInventoryConfig::new(url)))
        }
        None => {
            #[cfg(feature = "database")]
            let from_db = match &db {
                Some(conn) => {
                    let inventory = consign::inventory::SeaOrmInventory::new(conn.clone());
                    inventory
                        .create_schema()
                        .await
                        .context("failed to create products table")?;
                    tracing::info!("using database inventory");
                    Some(Arc::new(inventory) as Arc<dyn InventoryVisibility>)
                }
                None => None,
            };
            #[cfg(not(feature = "database"))]
            let from_db: Option<Arc<dyn InventoryVisibility>> = None;

            from_db.unwrap_or_else(|| {
                tracing::warn!(
                    "no inventory backend configured; visibility changes stay in memory"
                );
                Arc::new(InMemoryInventory::new())
            })
        }
    };

    let app = App::builder(config)
        .store(store)
        .provider(provider)
        .inventory(inventory)
        .build();

    app.serve().await.context("server error")?;
    Ok(())
}

fn in_memory_store() -> Arc<dyn TenantStore> {
    tracing::warn!("DATABASE_URL not set; tenant data is kept in memory and lost on restart");
    Arc::new(InMemoryTenantStore::new())
}

#[cfg(feature = "database")]
async fn connect_database(config: &Config) -> anyhow::Result<Option<sea_orm::DatabaseConnection>> {
    match &config.database.url {
        Some(url) => {
            let conn = sea_orm::Database::connect(url.as_str())
                .await
                .context("failed to connect to database")?;
            Ok(Some(conn))
        }
        None => Ok(None),
    }
}

fn billing_provider(config: &Config) -> anyhow::Result<Arc<dyn BillingProvider>> {
    #[cfg(feature = "stripe")]
    {
        if let Some(key) = &config.billing.stripe_secret_key {
            use consign::billing::{LiveStripeClient, LiveStripeClientConfig};

            let client_config = LiveStripeClientConfig::new()
                .max_retries(config.billing.max_retries)
                .timeout_seconds(config.billing.timeout_seconds);
            let client = LiveStripeClient::new(key.clone(), client_config)
                .context("invalid Stripe secret key")?;
            if client.is_test_mode() {
                tracing::info!("using Stripe in test mode");
            } else {
                tracing::info!("using Stripe in live mode");
            }
            return Ok(Arc::new(client));
        }
    }

    #[cfg(not(feature = "stripe"))]
    let _ = config;

    tracing::warn!("STRIPE_SECRET_KEY not set; using the sandbox billing provider");
    Ok(Arc::new(SandboxBillingProvider::new()))
}
