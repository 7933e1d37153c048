//! Collaborators owned by other parts of the shop: catalog stock and prices,
//! discount codes and the shopping cart.

use crate::entities::{cart_item, discount, product};
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter,
};
use tracing::{debug, error, warn};

/// Price and stock of a product at the moment of lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: i32,
    pub price: Decimal,
    pub quantity: i32,
}

#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn get_product(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
    ) -> Result<ProductSnapshot, ServiceError>;

    /// Takes `quantity` units out of stock; fails with `InsufficientStock` instead of going negative.
    async fn decrement_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError>;

    async fn restore_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountRef {
    pub id: i32,
    pub is_deleted: bool,
}

#[async_trait]
pub trait DiscountGateway: Send + Sync {
    async fn find_by_id(
        &self,
        txn: &DatabaseTransaction,
        discount_id: i32,
    ) -> Result<Option<DiscountRef>, ServiceError>;

    async fn find_by_code(
        &self,
        txn: &DatabaseTransaction,
        code: &str,
    ) -> Result<Option<DiscountRef>, ServiceError>;
}

#[async_trait]
pub trait CartGateway: Send + Sync {
    /// Removes the entries the user ticked for checkout. Returns how many were removed.
    async fn clear_selected(&self, db: &DatabaseConnection, user_id: i32) -> Result<u64, ServiceError>;
}

fn db_error(context: &str, e: sea_orm::DbErr) -> ServiceError {
    error!(error = %e, "{}", context);
    ServiceError::DatabaseError(e)
}

/// Catalog backed by the `products` table.
#[derive(Debug, Clone, Default)]
pub struct SeaOrmCatalog;

#[async_trait]
impl CatalogGateway for SeaOrmCatalog {
    async fn get_product(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
    ) -> Result<ProductSnapshot, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .filter(product::Column::IsDeleted.eq(false))
            .one(txn)
            .await
            .map_err(|e| db_error("Failed to load product", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        Ok(ProductSnapshot {
            id: product.id,
            price: product.price,
            quantity: product.quantity,
        })
    }

    async fn decrement_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        // Conditional update: concurrent orders cannot both take the last units.
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Quantity,
                Expr::col(product::Column::Quantity).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Quantity.gte(quantity))
            .exec(txn)
            .await
            .map_err(|e| db_error("Failed to decrement stock", e))?;

        if result.rows_affected == 0 {
            warn!(product_id, quantity, "stock decrement rejected");
            return Err(ServiceError::InsufficientStock(format!(
                "Product {} does not have {} units in stock",
                product_id, quantity
            )));
        }

        debug!(product_id, quantity, "stock decremented");
        Ok(())
    }

    async fn restore_stock(
        &self,
        txn: &DatabaseTransaction,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Quantity,
                Expr::col(product::Column::Quantity).add(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(txn)
            .await
            .map_err(|e| db_error("Failed to restore stock", e))?;

        if result.rows_affected == 0 {
            warn!(product_id, quantity, "stock restore found no product row");
        }
        Ok(())
    }
}

/// Discount lookups backed by the `discounts` table.
#[derive(Debug, Clone, Default)]
pub struct SeaOrmDiscounts;

#[async_trait]
impl DiscountGateway for SeaOrmDiscounts {
    async fn find_by_id(
        &self,
        txn: &DatabaseTransaction,
        discount_id: i32,
    ) -> Result<Option<DiscountRef>, ServiceError> {
        let found = discount::Entity::find_by_id(discount_id)
            .one(txn)
            .await
            .map_err(|e| db_error("Failed to load discount", e))?;
        Ok(found.map(|d| DiscountRef {
            id: d.id,
            is_deleted: d.is_deleted,
        }))
    }

    async fn find_by_code(
        &self,
        txn: &DatabaseTransaction,
        code: &str,
    ) -> Result<Option<DiscountRef>, ServiceError> {
        let found = discount::Entity::find()
            .filter(discount::Column::Code.eq(code.trim()))
            .one(txn)
            .await
            .map_err(|e| db_error("Failed to load discount", e))?;
        Ok(found.map(|d| DiscountRef {
            id: d.id,
            is_deleted: d.is_deleted,
        }))
    }
}

/// Cart backed by the `cart_items` table.
#[derive(Debug, Clone, Default)]
pub struct SeaOrmCart;

#[async_trait]
impl CartGateway for SeaOrmCart {
    async fn clear_selected(&self, db: &DatabaseConnection, user_id: i32) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Selected.eq(true))
            .exec(db)
            .await
            .map_err(|e| db_error("Failed to clear selected cart items", e))?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, Set, TransactionTrait};

    async fn db_with_product(quantity: i32) -> (DatabaseConnection, i32) {
        let db = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let product = product::ActiveModel {
            name: Set("Monstera".into()),
            price: Set(dec!(100000)),
            quantity: Set(quantity),
            is_deleted: Set(false),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();
        (db, product.id)
    }

    #[tokio::test]
    async fn decrement_never_oversells() {
        let (db, product_id) = db_with_product(5).await;
        let catalog = SeaOrmCatalog;

        let txn = db.begin().await.unwrap();
        catalog.decrement_stock(&txn, product_id, 3).await.unwrap();
        assert_matches!(
            catalog.decrement_stock(&txn, product_id, 3).await,
            Err(ServiceError::InsufficientStock(_))
        );
        catalog.restore_stock(&txn, product_id, 1).await.unwrap();
        let snapshot = catalog.get_product(&txn, product_id).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(snapshot.quantity, 3);
        assert_eq!(snapshot.price, dec!(100000));
    }

    #[tokio::test]
    async fn clears_only_selected_cart_entries() {
        let (db, product_id) = db_with_product(5).await;
        for selected in [true, true, false] {
            cart_item::ActiveModel {
                user_id: Set(7),
                product_id: Set(product_id),
                quantity: Set(1),
                selected: Set(selected),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
        }

        let removed = SeaOrmCart.clear_selected(&db, 7).await.unwrap();
        assert_eq!(removed, 2);
        let remaining = cart_item::Entity::find().all(&db).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].selected);
    }
}
