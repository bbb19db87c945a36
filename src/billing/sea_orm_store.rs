//! SeaORM-backed tenant storage.
//!
//! Provides production-ready database persistence for subscriptions, tenant
//! accounts and device sessions using SeaORM.
//!
//! # Example
//!
//! ```rust,ignore
//! use consign::billing::SeaOrmTenantStore;
//! use sea_orm::Database;
//!
//! let db = Database::connect(&config.database.url).await?;
//! let store = SeaOrmTenantStore::new(db);
//! store.create_schema().await?;
//!
//! let manager = SubscriptionManager::new(store, provider, inventory, plans);
//! ```

use async_trait::async_trait;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Schema, Set, TransactionTrait,
    sea_query::OnConflict,
};

use super::storage::{
    ActiveSession, StoredSubscription, SubscriptionStatus, TenantAccount, TenantStore,
};
use crate::error::{ConsignError, Result};
use crate::utils::unix_now;

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    // -------------------------------------------------------------------------
    // Tenant Entity
    // -------------------------------------------------------------------------
    pub mod tenant {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "tenants")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub tenant_id: String,
            pub is_active: bool,
            pub subscription_start: Option<i64>,
            pub subscription_end: Option<i64>,
            pub billing_customer_id: Option<String>,
            pub updated_at: i64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    // -------------------------------------------------------------------------
    // Subscription Entity
    // -------------------------------------------------------------------------
    pub mod subscription {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "subscriptions")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub tenant_id: String,
            #[sea_orm(unique)]
            pub external_subscription_id: String,
            pub external_customer_id: String,
            pub plan_name: String,
            pub plan_price_id: String,
            pub status: String,
            pub current_period_start: i64,
            pub current_period_end: i64,
            pub cancel_at_period_end: bool,
            pub referrer_tenant_id: Option<String>,
            pub created_at: i64,
            pub updated_at: i64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    // -------------------------------------------------------------------------
    // Superseded Subscription Entity
    // -------------------------------------------------------------------------
    pub mod subscription_history {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "subscription_history")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub tenant_id: String,
            pub external_subscription_id: String,
            pub external_customer_id: String,
            pub plan_name: String,
            pub plan_price_id: String,
            pub status: String,
            pub current_period_start: i64,
            pub current_period_end: i64,
            pub cancel_at_period_end: bool,
            pub referrer_tenant_id: Option<String>,
            pub created_at: i64,
            pub updated_at: i64,
            pub superseded_at: i64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    // -------------------------------------------------------------------------
    // Active Session Entity
    // -------------------------------------------------------------------------
    pub mod active_session {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "active_sessions")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub tenant_id: String,
            #[sea_orm(primary_key, auto_increment = false)]
            pub device_id: String,
            pub last_active_at: i64,
            pub created_at: i64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{active_session, subscription, subscription_history, tenant};

// =============================================================================
// Helper Functions
// =============================================================================

/// Convert i64 to u64 safely (negative values become 0).
#[inline]
fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Convert u64 to i64 safely (values > i64::MAX become i64::MAX).
#[inline]
fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[inline]
fn db_err(e: DbErr) -> ConsignError {
    ConsignError::Persistence(e.to_string())
}

fn model_to_stored_subscription(model: subscription::Model) -> StoredSubscription {
    StoredSubscription {
        tenant_id: model.tenant_id,
        external_subscription_id: model.external_subscription_id,
        external_customer_id: model.external_customer_id,
        plan_name: model.plan_name,
        plan_price_id: model.plan_price_id,
        status: SubscriptionStatus::parse(&model.status),
        current_period_start: i64_to_u64(model.current_period_start),
        current_period_end: i64_to_u64(model.current_period_end),
        cancel_at_period_end: model.cancel_at_period_end,
        referrer_tenant_id: model.referrer_tenant_id,
        created_at: i64_to_u64(model.created_at),
        updated_at: i64_to_u64(model.updated_at),
    }
}

fn subscription_to_active_model(record: &StoredSubscription) -> subscription::ActiveModel {
    subscription::ActiveModel {
        tenant_id: Set(record.tenant_id.clone()),
        external_subscription_id: Set(record.external_subscription_id.clone()),
        external_customer_id: Set(record.external_customer_id.clone()),
        plan_name: Set(record.plan_name.clone()),
        plan_price_id: Set(record.plan_price_id.clone()),
        status: Set(record.status.as_str().to_string()),
        current_period_start: Set(u64_to_i64(record.current_period_start)),
        current_period_end: Set(u64_to_i64(record.current_period_end)),
        cancel_at_period_end: Set(record.cancel_at_period_end),
        referrer_tenant_id: Set(record.referrer_tenant_id.clone()),
        created_at: Set(u64_to_i64(record.created_at)),
        updated_at: Set(u64_to_i64(record.updated_at)),
    }
}

fn history_to_stored_subscription(model: subscription_history::Model) -> StoredSubscription {
    StoredSubscription {
        tenant_id: model.tenant_id,
        external_subscription_id: model.external_subscription_id,
        external_customer_id: model.external_customer_id,
        plan_name: model.plan_name,
        plan_price_id: model.plan_price_id,
        status: SubscriptionStatus::parse(&model.status),
        current_period_start: i64_to_u64(model.current_period_start),
        current_period_end: i64_to_u64(model.current_period_end),
        cancel_at_period_end: model.cancel_at_period_end,
        referrer_tenant_id: model.referrer_tenant_id,
        created_at: i64_to_u64(model.created_at),
        updated_at: i64_to_u64(model.updated_at),
    }
}

fn model_to_tenant(model: tenant::Model) -> TenantAccount {
    TenantAccount {
        tenant_id: model.tenant_id,
        is_active: model.is_active,
        subscription_start: model.subscription_start.map(i64_to_u64),
        subscription_end: model.subscription_end.map(i64_to_u64),
        billing_customer_id: model.billing_customer_id,
        updated_at: i64_to_u64(model.updated_at),
    }
}

fn model_to_session(model: active_session::Model) -> ActiveSession {
    ActiveSession {
        tenant_id: model.tenant_id,
        device_id: model.device_id,
        last_active_at: i64_to_u64(model.last_active_at),
        created_at: i64_to_u64(model.created_at),
    }
}

/// A fresh inactive tenant row, used as the insert half of tenant upserts.
fn new_tenant_row(tenant_id: &str, now: i64) -> tenant::ActiveModel {
    tenant::ActiveModel {
        tenant_id: Set(tenant_id.to_string()),
        is_active: Set(false),
        subscription_start: Set(None),
        subscription_end: Set(None),
        billing_customer_id: Set(None),
        updated_at: Set(now),
    }
}

/// Upsert the subscription row and mirror its period onto the tenant row.
///
/// With `is_active` set the tenant flag is written too.
async fn write_subscription<C: ConnectionTrait>(
    conn: &C,
    record: &StoredSubscription,
    is_active: Option<bool>,
) -> std::result::Result<(), DbErr> {
    subscription::Entity::insert(subscription_to_active_model(record))
        .on_conflict(
            OnConflict::column(subscription::Column::TenantId)
                .update_columns([
                    subscription::Column::ExternalSubscriptionId,
                    subscription::Column::ExternalCustomerId,
                    subscription::Column::PlanName,
                    subscription::Column::PlanPriceId,
                    subscription::Column::Status,
                    subscription::Column::CurrentPeriodStart,
                    subscription::Column::CurrentPeriodEnd,
                    subscription::Column::CancelAtPeriodEnd,
                    subscription::Column::ReferrerTenantId,
                    subscription::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    let now = u64_to_i64(unix_now());
    let mut row = new_tenant_row(&record.tenant_id, now);
    row.subscription_start = Set(Some(u64_to_i64(record.current_period_start)));
    row.subscription_end = Set(Some(u64_to_i64(record.current_period_end)));

    let mut update = vec![
        tenant::Column::SubscriptionStart,
        tenant::Column::SubscriptionEnd,
        tenant::Column::UpdatedAt,
    ];
    if let Some(active) = is_active {
        row.is_active = Set(active);
        update.push(tenant::Column::IsActive);
    }

    tenant::Entity::insert(row)
        .on_conflict(
            OnConflict::column(tenant::Column::TenantId)
                .update_columns(update)
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

// =============================================================================
// SeaOrmTenantStore
// =============================================================================

/// SeaORM-backed [`TenantStore`].
///
/// Multi-row writes run in a transaction, so [`TenantStore::save_reconciled`]
/// never leaves a subscription and its tenant flag out of step.
#[derive(Clone, Debug)]
pub struct SeaOrmTenantStore {
    db: DatabaseConnection,
}

impl SeaOrmTenantStore {
    /// Create a new SeaORM tenant store.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the billing tables if they do not exist.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let statements = [
            schema
                .create_table_from_entity(tenant::Entity)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(subscription::Entity)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(subscription_history::Entity)
                .if_not_exists()
                .to_owned(),
            schema
                .create_table_from_entity(active_session::Entity)
                .if_not_exists()
                .to_owned(),
        ];

        for stmt in statements {
            self.db.execute(backend.build(&stmt)).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn upsert_tenant_column(
        &self,
        row: tenant::ActiveModel,
        column: tenant::Column,
    ) -> Result<()> {
        tenant::Entity::insert(row)
            .on_conflict(
                OnConflict::column(tenant::Column::TenantId)
                    .update_columns([column, tenant::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl TenantStore for SeaOrmTenantStore {
    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    async fn find_subscription_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        let model = subscription::Entity::find_by_id(tenant_id.to_string())
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(model.map(model_to_stored_subscription))
    }

    async fn upsert_subscription(&self, record: &StoredSubscription) -> Result<()> {
        tracing::debug!(
            tenant_id = %record.tenant_id,
            subscription_id = %record.external_subscription_id,
            status = %record.status,
            "saving subscription"
        );

        let txn = self.db.begin().await.map_err(db_err)?;
        write_subscription(&txn, record, None)
            .await
            .map_err(db_err)?;
        txn.commit().await.map_err(db_err)
    }

    async fn list_all_subscriptions(&self) -> Result<Vec<StoredSubscription>> {
        let models = subscription::Entity::find()
            .order_by_asc(subscription::Column::TenantId)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(models.into_iter().map(model_to_stored_subscription).collect())
    }

    async fn record_superseded_subscription(&self, record: &StoredSubscription) -> Result<()> {
        let row = subscription_history::ActiveModel {
            tenant_id: Set(record.tenant_id.clone()),
            external_subscription_id: Set(record.external_subscription_id.clone()),
            external_customer_id: Set(record.external_customer_id.clone()),
            plan_name: Set(record.plan_name.clone()),
            plan_price_id: Set(record.plan_price_id.clone()),
            status: Set(record.status.as_str().to_string()),
            current_period_start: Set(u64_to_i64(record.current_period_start)),
            current_period_end: Set(u64_to_i64(record.current_period_end)),
            cancel_at_period_end: Set(record.cancel_at_period_end),
            referrer_tenant_id: Set(record.referrer_tenant_id.clone()),
            created_at: Set(u64_to_i64(record.created_at)),
            updated_at: Set(u64_to_i64(record.updated_at)),
            superseded_at: Set(u64_to_i64(unix_now())),
            id: NotSet,
        };

        subscription_history::Entity::insert(row)
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_superseded_subscriptions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<StoredSubscription>> {
        let models = subscription_history::Entity::find()
            .filter(subscription_history::Column::TenantId.eq(tenant_id))
            .order_by_asc(subscription_history::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(models
            .into_iter()
            .map(history_to_stored_subscription)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Tenant Accounts
    // -------------------------------------------------------------------------

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<TenantAccount>> {
        let model = tenant::Entity::find_by_id(tenant_id.to_string())
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(model.map(model_to_tenant))
    }

    async fn set_tenant_active(&self, tenant_id: &str, is_active: bool) -> Result<()> {
        let mut row = new_tenant_row(tenant_id, u64_to_i64(unix_now()));
        row.is_active = Set(is_active);
        self.upsert_tenant_column(row, tenant::Column::IsActive).await
    }

    async fn set_billing_customer_id(&self, tenant_id: &str, customer_id: &str) -> Result<()> {
        let mut row = new_tenant_row(tenant_id, u64_to_i64(unix_now()));
        row.billing_customer_id = Set(Some(customer_id.to_string()));
        self.upsert_tenant_column(row, tenant::Column::BillingCustomerId)
            .await
    }

    async fn save_reconciled(&self, record: &StoredSubscription, is_active: bool) -> Result<()> {
        let txn = self.db.begin().await.map_err(db_err)?;
        write_subscription(&txn, record, Some(is_active))
            .await
            .map_err(db_err)?;
        txn.commit().await.map_err(db_err)
    }

    // -------------------------------------------------------------------------
    // Device Sessions
    // -------------------------------------------------------------------------

    async fn count_active_sessions(&self, tenant_id: &str) -> Result<u64> {
        active_session::Entity::find()
            .filter(active_session::Column::TenantId.eq(tenant_id))
            .count(&self.db)
            .await
            .map_err(db_err)
    }

    async fn find_active_session(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<ActiveSession>> {
        let key = (tenant_id.to_string(), device_id.to_string());
        let model = active_session::Entity::find_by_id(key)
            .one(&self.db)
            .await
            .map_err(db_err)?;

        Ok(model.map(model_to_session))
    }

    async fn upsert_active_session(&self, session: &ActiveSession) -> Result<()> {
        let row = active_session::ActiveModel {
            tenant_id: Set(session.tenant_id.clone()),
            device_id: Set(session.device_id.clone()),
            last_active_at: Set(u64_to_i64(session.last_active_at)),
            created_at: Set(u64_to_i64(session.created_at)),
        };

        active_session::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    active_session::Column::TenantId,
                    active_session::Column::DeviceId,
                ])
                .update_column(active_session::Column::LastActiveAt)
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_active_sessions(&self, tenant_id: &str) -> Result<Vec<ActiveSession>> {
        let models = active_session::Entity::find()
            .filter(active_session::Column::TenantId.eq(tenant_id))
            .order_by_desc(active_session::Column::LastActiveAt)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(models.into_iter().map(model_to_session).collect())
    }

    async fn delete_active_session(&self, tenant_id: &str, device_id: &str) -> Result<bool> {
        let result = active_session::Entity::delete_many()
            .filter(active_session::Column::TenantId.eq(tenant_id))
            .filter(active_session::Column::DeviceId.eq(device_id))
            .exec(&self.db)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected > 0)
    }
}
