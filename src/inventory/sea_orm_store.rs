//! Product visibility over a SeaORM products table.
//!
//! Used when consign shares a database with the storefront. Archiving is a
//! single bulk `UPDATE` per tenant.

use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Schema,
    sea_query::Expr,
};

use super::{InventoryVisibility, VisibilityAction};
use crate::error::{ConsignError, Result};

pub(crate) mod product {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "products")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub tenant_id: String,
        pub title: String,
        pub archived: bool,
        pub updated_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// SeaORM-backed [`InventoryVisibility`].
#[derive(Clone, Debug)]
pub struct SeaOrmInventory {
    db: DatabaseConnection,
}

impl SeaOrmInventory {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create the products table if it does not exist.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let stmt = Schema::new(backend)
            .create_table_from_entity(product::Entity)
            .if_not_exists()
            .to_owned();
        self.db
            .execute(backend.build(&stmt))
            .await
            .map_err(|e| ConsignError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn set_archived(&self, tenant_id: &str, action: VisibilityAction) -> Result<u64> {
        let archived = matches!(action, VisibilityAction::Archive);
        let now = i64::try_from(crate::utils::unix_now()).unwrap_or(i64::MAX);

        // Only rows whose state actually flips are counted.
        let result = product::Entity::update_many()
            .col_expr(product::Column::Archived, Expr::value(archived))
            .col_expr(product::Column::UpdatedAt, Expr::value(now))
            .filter(product::Column::TenantId.eq(tenant_id))
            .filter(product::Column::Archived.eq(!archived))
            .exec(&self.db)
            .await
            .map_err(|e| ConsignError::Persistence(e.to_string()))?;

        tracing::debug!(
            target: "consign::inventory",
            tenant_id = %tenant_id,
            action = action.as_str(),
            affected = result.rows_affected,
            "products visibility updated"
        );
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl InventoryVisibility for SeaOrmInventory {
    async fn archive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.set_archived(tenant_id, VisibilityAction::Archive).await
    }

    async fn unarchive_all_products(&self, tenant_id: &str) -> Result<u64> {
        self.set_archived(tenant_id, VisibilityAction::Unarchive).await
    }
}
