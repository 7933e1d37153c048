//! Reads and bulk writes on the order aggregate shared by the services.
//!
//! Everything here is generic over [`ConnectionTrait`] so it runs equally on the
//! pool or inside an open transaction.

use crate::entities::{
    deposit, order, order_line, payment,
    payment::PaymentStatus,
    payment_method,
};
use crate::errors::ServiceError;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::error;

pub(crate) fn db_error(context: &str, e: sea_orm::DbErr) -> ServiceError {
    error!(error = %e, "{}", context);
    ServiceError::DatabaseError(e)
}

/// Live (not soft-deleted) order.
pub async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .filter(order::Column::IsDeleted.eq(false))
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to load order", e))?
        .ok_or_else(|| ServiceError::order_not_found(order_id))
}

pub async fn live_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Vec<order_line::Model>, ServiceError> {
    order_line::Entity::find()
        .filter(order_line::Column::OrderId.eq(order_id))
        .filter(order_line::Column::IsDeleted.eq(false))
        .order_by_asc(order_line::Column::Id)
        .all(conn)
        .await
        .map_err(|e| db_error("Failed to load order lines", e))
}

pub async fn find_line<C: ConnectionTrait>(
    conn: &C,
    line_id: i32,
) -> Result<order_line::Model, ServiceError> {
    order_line::Entity::find_by_id(line_id)
        .filter(order_line::Column::IsDeleted.eq(false))
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to load order line", e))?
        .ok_or_else(|| ServiceError::NotFound(format!("Order line {} not found", line_id)))
}

pub async fn payments_for_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Vec<payment::Model>, ServiceError> {
    payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::IsDeleted.eq(false))
        .order_by_asc(payment::Column::Id)
        .all(conn)
        .await
        .map_err(|e| db_error("Failed to load payments", e))
}

/// Sets every live payment of the order to `status`. Returns the number of rows touched.
pub async fn set_payments_status<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
    status: PaymentStatus,
) -> Result<u64, ServiceError> {
    let result = payment::Entity::update_many()
        .col_expr(payment::Column::Status, Expr::value(status))
        .col_expr(payment::Column::PaymentDate, Expr::value(Utc::now()))
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::IsDeleted.eq(false))
        .exec(conn)
        .await
        .map_err(|e| db_error("Failed to update payment statuses", e))?;
    Ok(result.rows_affected)
}

/// Most recent deposit row of the order, paid or not.
pub async fn latest_deposit<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Option<deposit::Model>, ServiceError> {
    deposit::Entity::find()
        .filter(deposit::Column::OrderId.eq(order_id))
        .order_by_desc(deposit::Column::CreatedAt)
        .order_by_desc(deposit::Column::Id)
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to load deposit", e))
}

pub async fn latest_unpaid_deposit<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Option<deposit::Model>, ServiceError> {
    deposit::Entity::find()
        .filter(deposit::Column::OrderId.eq(order_id))
        .filter(deposit::Column::Paid.eq(false))
        .order_by_desc(deposit::Column::CreatedAt)
        .order_by_desc(deposit::Column::Id)
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to load deposit", e))
}

pub async fn find_method<C: ConnectionTrait>(
    conn: &C,
    method_id: i32,
) -> Result<Option<payment_method::Model>, ServiceError> {
    payment_method::Entity::find_by_id(method_id)
        .filter(payment_method::Column::IsDeleted.eq(false))
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to load payment method", e))
}

/// Case-insensitive lookup by method name.
pub async fn find_method_by_name<C: ConnectionTrait>(
    conn: &C,
    name: &str,
) -> Result<Option<payment_method::Model>, ServiceError> {
    let wanted = name.trim().to_lowercase();
    let methods = payment_method::Entity::find()
        .filter(payment_method::Column::IsDeleted.eq(false))
        .all(conn)
        .await
        .map_err(|e| db_error("Failed to load payment methods", e))?;
    Ok(methods
        .into_iter()
        .find(|m| m.method_name.trim().to_lowercase() == wanted))
}

/// Resolves a gateway-facing order id through the request tracking stored on
/// deposit and payment rows.
pub async fn order_id_for_gateway_id<C: ConnectionTrait>(
    conn: &C,
    gateway_order_id: &str,
) -> Result<Option<i32>, ServiceError> {
    let deposit = deposit::Entity::find()
        .filter(deposit::Column::GatewayOrderId.eq(gateway_order_id))
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to look up deposit by gateway id", e))?;
    if let Some(deposit) = deposit {
        return Ok(Some(deposit.order_id));
    }

    let payment = payment::Entity::find()
        .filter(payment::Column::GatewayOrderId.eq(gateway_order_id))
        .one(conn)
        .await
        .map_err(|e| db_error("Failed to look up payment by gateway id", e))?;
    Ok(payment.map(|p| p.order_id))
}

/// `final_total = max(total - discount, 0)`.
pub fn final_total(total: Decimal, discount_amount: Decimal) -> Decimal {
    (total - discount_amount).max(Decimal::ZERO)
}

/// Re-derives order totals from its live lines after a line edit.
pub async fn recompute_totals<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
) -> Result<order::Model, ServiceError> {
    let lines = live_lines(conn, order.id).await?;
    let total: Decimal = lines.iter().map(|l| l.sub_total).sum();
    let discount_amount = order.discount_amount;

    let mut active: order::ActiveModel = order.into();
    active.total = Set(total);
    active.final_total = Set(final_total(total, discount_amount));
    active
        .update(conn)
        .await
        .map_err(|e| db_error("Failed to update order totals", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn final_total_never_negative() {
        assert_eq!(final_total(dec!(1200000), dec!(0)), dec!(1200000));
        assert_eq!(final_total(dec!(100), dec!(30)), dec!(70));
        assert_eq!(final_total(dec!(100), dec!(150)), dec!(0));
    }
}
