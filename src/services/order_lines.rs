//! Order line reads and the edits allowed while an order awaits confirmation.

use crate::{
    auth::Requester,
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        order_line, product,
    },
    errors::ServiceError,
    services::{
        catalog::CatalogGateway,
        orders::OrderLineResponse,
        store::{self, db_error},
    },
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderLineRequest {
    pub quantity: i32,
    /// Admin-only price correction
    pub price_override: Option<Decimal>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

fn ensure_pending(order: &order::Model) -> Result<(), ServiceError> {
    if order.status == OrderStatus::PendingConfirmation {
        Ok(())
    } else {
        Err(ServiceError::Conflict(format!(
            "Order {} is {}; lines can only change while PENDING_CONFIRMATION",
            order.id, order.status
        )))
    }
}

#[derive(Clone)]
pub struct OrderLineService {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn CatalogGateway>,
}

impl OrderLineService {
    pub fn new(db_pool: Arc<DbPool>, catalog: Arc<dyn CatalogGateway>) -> Self {
        Self { db_pool, catalog }
    }

    async fn product_for(
        &self,
        line: &order_line::Model,
    ) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(line.product_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| db_error("Failed to load product", e))
    }

    #[instrument(skip(self), fields(line_id = line_id))]
    pub async fn get_order_line(
        &self,
        requester: &Requester,
        line_id: i32,
    ) -> Result<OrderLineResponse, ServiceError> {
        let db = &*self.db_pool;
        let line = store::find_line(db, line_id).await?;
        let order = store::find_order(db, line.order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let product = self.product_for(&line).await?;
        Ok(OrderLineResponse::from_parts(line, product))
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_order_lines(
        &self,
        requester: &Requester,
        order_id: i32,
    ) -> Result<Vec<OrderLineResponse>, ServiceError> {
        let db = &*self.db_pool;
        let order = store::find_order(db, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let rows = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .filter(order_line::Column::IsDeleted.eq(false))
            .order_by_asc(order_line::Column::Id)
            .find_also_related(product::Entity)
            .all(db)
            .await
            .map_err(|e| db_error("Failed to load order lines", e))?;

        Ok(rows
            .into_iter()
            .map(|(l, p)| OrderLineResponse::from_parts(l, p))
            .collect())
    }

    /// Changes quantity, note or (admins only) price; stock follows the quantity delta.
    #[instrument(skip(self, request), fields(line_id = line_id, quantity = request.quantity))]
    pub async fn update_order_line(
        &self,
        requester: &Requester,
        line_id: i32,
        request: UpdateOrderLineRequest,
    ) -> Result<OrderLineResponse, ServiceError> {
        request.validate()?;
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        if let Some(price) = request.price_override {
            if !requester.is_admin() {
                return Err(ServiceError::access_denied());
            }
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Price must not be negative".to_string(),
                ));
            }
        }

        let txn = self.begin().await?;
        let line = store::find_line(&txn, line_id).await?;
        let order = store::find_order(&txn, line.order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;
        ensure_pending(&order)?;

        let delta = request.quantity - line.quantity;
        match delta.cmp(&0) {
            Ordering::Greater => {
                self.catalog
                    .decrement_stock(&txn, line.product_id, delta)
                    .await?
            }
            Ordering::Less => {
                self.catalog
                    .restore_stock(&txn, line.product_id, -delta)
                    .await?
            }
            Ordering::Equal => {}
        }

        let price = request.price_override.unwrap_or(line.price_at_order);
        let mut active: order_line::ActiveModel = line.into();
        active.quantity = Set(request.quantity);
        active.price_at_order = Set(price);
        active.sub_total = Set(price * Decimal::from(request.quantity));
        if request.note.is_some() {
            active.note = Set(request.note);
        }
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| db_error("Failed to update order line", e))?;

        let order = store::recompute_totals(&txn, order).await?;
        self.commit(txn).await?;

        info!(order_id = order.id, delta, total = %order.total, "order line updated");
        let product = self.product_for(&updated).await?;
        Ok(OrderLineResponse::from_parts(updated, product))
    }

    /// Soft-deletes a line and returns its units to stock.
    #[instrument(skip(self), fields(line_id = line_id))]
    pub async fn delete_order_line(
        &self,
        requester: &Requester,
        line_id: i32,
    ) -> Result<(), ServiceError> {
        requester.ensure_admin()?;

        let txn = self.begin().await?;
        let line = store::find_line(&txn, line_id).await?;
        let order = store::find_order(&txn, line.order_id).await?;
        ensure_pending(&order)?;

        self.catalog
            .restore_stock(&txn, line.product_id, line.quantity)
            .await?;

        let mut active: order_line::ActiveModel = line.into();
        active.is_deleted = Set(true);
        active
            .update(&txn)
            .await
            .map_err(|e| db_error("Failed to delete order line", e))?;

        let order = store::recompute_totals(&txn, order).await?;
        self.commit(txn).await?;

        info!(order_id = order.id, total = %order.total, "order line deleted");
        Ok(())
    }

    async fn begin(&self) -> Result<DatabaseTransaction, ServiceError> {
        self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })
    }

    async fn commit(&self, txn: DatabaseTransaction) -> Result<(), ServiceError> {
        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order line change");
            ServiceError::DatabaseError(e)
        })
    }
}
