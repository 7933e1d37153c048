use crate::{
    auth::Requester,
    config::DepositPolicy,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, ShippingStatus},
        order_line,
        payment::{self, PaymentStatus},
        payment_method, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::CreatePaymentResponse,
    services::{
        catalog::{CatalogGateway, DiscountGateway},
        deposits::{self, DepositResponse},
        order_status::{
            check_combination, check_payment_update, check_shipping_precondition,
            check_status_change, effective_payment_status,
        },
        post_commit::{PostCommitRunner, PostCommitTask},
        store::{self, db_error},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

/// One requested line. Monetary fields are advisory; prices come from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderLine {
    pub product_id: i32,
    pub quantity: i32,
    pub price_at_order: Option<Decimal>,
    pub sub_total: Option<Decimal>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Payment method chosen at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub method_id: i32,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one line"))]
    pub items: Vec<CreateOrderLine>,
    pub total: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub final_total: Option<Decimal>,
    pub discount_id: Option<i32>,
    pub discount_code: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub shipping_name: Option<String>,
    #[validate(length(min = 1, max = 500))]
    pub shipping_address: Option<String>,
    #[validate(length(min = 6, max = 20))]
    pub shipping_phone: Option<String>,
    pub payment: Option<PaymentIntent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateShippingStatusRequest {
    pub shipping_status: ShippingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub price_at_order: Decimal,
    pub sub_total: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderLineResponse {
    pub(crate) fn from_parts(line: order_line::Model, product: Option<product::Model>) -> Self {
        Self {
            id: line.id,
            order_id: line.order_id,
            product_id: line.product_id,
            product_name: product.map(|p| p.name),
            quantity: line.quantity,
            price_at_order: line.price_at_order,
            sub_total: line.sub_total,
            note: line.note,
            created_at: line.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: i32,
    pub user_id: i32,
    pub total: Decimal,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub shipping_status: ShippingStatus,
    pub shipping_name: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_phone: Option<String>,
    pub discount_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLineResponse>,
    pub deposit_required: bool,
    pub deposit: Option<DepositResponse>,
    /// Present only on creation, when a deposit link could be generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_payment: Option<CreatePaymentResponse>,
}

/// A requested line priced against the catalog.
#[derive(Debug, Clone)]
struct PricedLine {
    product_id: i32,
    quantity: i32,
    price: Decimal,
    sub_total: Decimal,
    note: Option<String>,
}

fn ensure_non_negative(field: &str, value: Option<Decimal>) -> Result<(), ServiceError> {
    match value {
        Some(v) if v < Decimal::ZERO => Err(ServiceError::ValidationError(format!(
            "{} must not be negative",
            field
        ))),
        _ => Ok(()),
    }
}

fn validate_create_request(request: &CreateOrderRequest) -> Result<(), ServiceError> {
    request.validate()?;

    ensure_non_negative("total", request.total)?;
    ensure_non_negative("final_total", request.final_total)?;
    ensure_non_negative("discount_amount", request.discount_amount)?;

    for item in &request.items {
        item.validate()?;
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be greater than zero",
                item.product_id
            )));
        }
        ensure_non_negative("price_at_order", item.price_at_order)?;
        ensure_non_negative("sub_total", item.sub_total)?;
    }
    Ok(())
}

fn log_advisory_mismatch(field: &'static str, submitted: Option<Decimal>, computed: Decimal) {
    if let Some(submitted) = submitted {
        if submitted != computed {
            debug!(field, %submitted, %computed, "client amount differs from server pricing");
        }
    }
}

/// Order lifecycle: creation, status and shipping transitions, soft deletion.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    catalog: Arc<dyn CatalogGateway>,
    discounts: Arc<dyn DiscountGateway>,
    post_commit: PostCommitRunner,
    deposit_policy: DepositPolicy,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn CatalogGateway>,
        discounts: Arc<dyn DiscountGateway>,
        post_commit: PostCommitRunner,
        deposit_policy: DepositPolicy,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            catalog,
            discounts,
            post_commit,
            deposit_policy,
        }
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            for event in events {
                sender.send_or_log(event).await;
            }
        }
    }

    /// Places an order: prices the lines, reserves stock and persists order and
    /// lines atomically, then runs the best-effort follow-ups.
    #[instrument(skip(self, request), fields(user_id = requester.user_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        requester: &Requester,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if !requester.can_purchase() {
            return Err(ServiceError::Forbidden(
                "only customers can place orders".to_string(),
            ));
        }
        validate_create_request(&request)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let discount_id = self.resolve_discount(&txn, &request).await?;

        let mut priced = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = self.catalog.get_product(&txn, item.product_id).await?;
            if item.quantity > product.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Product {} has {} units in stock, {} requested",
                    product.id, product.quantity, item.quantity
                )));
            }
            let sub_total = product.price * Decimal::from(item.quantity);
            log_advisory_mismatch("price_at_order", item.price_at_order, product.price);
            log_advisory_mismatch("sub_total", item.sub_total, sub_total);

            priced.push(PricedLine {
                product_id: product.id,
                quantity: item.quantity,
                price: product.price,
                sub_total,
                note: item.note.clone(),
            });
        }

        let total: Decimal = priced.iter().map(|l| l.sub_total).sum();
        let discount_amount = request.discount_amount.unwrap_or(Decimal::ZERO).min(total);
        let final_total = store::final_total(total, discount_amount);
        log_advisory_mismatch("total", request.total, total);
        log_advisory_mismatch("final_total", request.final_total, final_total);

        let created = order::ActiveModel {
            total: Set(total),
            discount_amount: Set(discount_amount),
            final_total: Set(final_total),
            status: Set(OrderStatus::PendingConfirmation),
            shipping_status: Set(ShippingStatus::Undelivered),
            shipping_name: Set(request.shipping_name.clone()),
            shipping_address: Set(request.shipping_address.clone()),
            shipping_phone: Set(request.shipping_phone.clone()),
            user_id: Set(requester.user_id),
            discount_id: Set(discount_id),
            is_deleted: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| db_error("Failed to create order", e))?;

        for line in &priced {
            order_line::ActiveModel {
                order_id: Set(created.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                price_at_order: Set(line.price),
                sub_total: Set(line.sub_total),
                note: Set(line.note.clone()),
                is_deleted: Set(false),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(|e| db_error("Failed to create order line", e))?;

            self.catalog
                .decrement_stock(&txn, line.product_id, line.quantity)
                .await?;
        }

        let lines = store::live_lines(&txn, created.id).await?;
        let deposit_required = deposits::requires_deposit(&lines, &self.deposit_policy);

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = created.id, "Failed to commit order");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = created.id, %final_total, deposit_required, "order created");

        let mut tasks = Vec::new();
        if let Some(intent) = &request.payment {
            log_advisory_mismatch("payment.amount", intent.amount, final_total);
            tasks.push(PostCommitTask::RecordPayment {
                order_id: created.id,
                method_id: intent.method_id,
                amount: final_total,
            });
        }
        tasks.push(PostCommitTask::ClearSelectedCart {
            user_id: requester.user_id,
        });
        if deposit_required {
            tasks.push(PostCommitTask::RequestDepositLink {
                order_id: created.id,
                requester: *requester,
            });
        }
        let report = self.post_commit.run(tasks).await;

        self.publish(vec![Event::OrderCreated {
            order_id: created.id,
            user_id: created.user_id,
            final_total,
            deposit_required,
        }])
        .await;

        let mut response = self.to_response(db, created).await?;
        response.deposit_payment = report.deposit_link;
        Ok(response)
    }

    async fn resolve_discount(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateOrderRequest,
    ) -> Result<Option<i32>, ServiceError> {
        let found = if let Some(discount_id) = request.discount_id {
            self.discounts.find_by_id(txn, discount_id).await?
        } else if let Some(code) = request
            .discount_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            self.discounts.find_by_code(txn, code).await?
        } else {
            return Ok(None);
        };

        match found {
            Some(discount) if !discount.is_deleted => Ok(Some(discount.id)),
            _ => Err(ServiceError::NotFound("Discount not found".to_string())),
        }
    }

    /// Builds the full representation: lines, deposit requirement and latest deposit.
    pub(crate) async fn to_response<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
    ) -> Result<OrderResponse, ServiceError> {
        let rows = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .filter(order_line::Column::IsDeleted.eq(false))
            .order_by_asc(order_line::Column::Id)
            .find_also_related(product::Entity)
            .all(conn)
            .await
            .map_err(|e| db_error("Failed to load order lines", e))?;

        let plain: Vec<order_line::Model> = rows.iter().map(|(l, _)| l.clone()).collect();
        let deposit_required = deposits::requires_deposit(&plain, &self.deposit_policy);
        let deposit = deposits::deposit_view(conn, order.id).await?;

        Ok(OrderResponse {
            id: order.id,
            user_id: order.user_id,
            total: order.total,
            discount_amount: order.discount_amount,
            final_total: order.final_total,
            order_date: order.order_date,
            status: order.status,
            shipping_status: order.shipping_status,
            shipping_name: order.shipping_name,
            shipping_address: order.shipping_address,
            shipping_phone: order.shipping_phone,
            discount_id: order.discount_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
            lines: rows
                .into_iter()
                .map(|(l, p)| OrderLineResponse::from_parts(l, p))
                .collect(),
            deposit_required,
            deposit,
            deposit_payment: None,
        })
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_order_by_id(
        &self,
        requester: &Requester,
        order_id: i32,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = store::find_order(db, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;
        self.to_response(db, order).await
    }

    #[instrument(skip(self), fields(user_id = user_id))]
    pub async fn get_orders_by_user(
        &self,
        requester: &Requester,
        user_id: i32,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        requester.ensure_can_act_on(user_id)?;

        let db = &*self.db_pool;
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::IsDeleted.eq(false))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(|e| db_error("Failed to load orders", e))?;

        if orders.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "No orders found for user {}",
                user_id
            )));
        }

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            responses.push(self.to_response(db, order).await?);
        }
        Ok(responses)
    }

    #[instrument(skip(self))]
    pub async fn get_all_orders(
        &self,
        requester: &Requester,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        requester.ensure_admin()?;

        let db = &*self.db_pool;
        let orders = order::Entity::find()
            .filter(order::Column::IsDeleted.eq(false))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await
            .map_err(|e| db_error("Failed to load orders", e))?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            responses.push(self.to_response(db, order).await?);
        }
        Ok(responses)
    }

    #[instrument(skip(self), fields(order_id = order_id, new_status = %new_status))]
    pub async fn update_order_status(
        &self,
        requester: &Requester,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = store::find_order(&txn, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let (updated, events) = self.apply_status(&txn, requester, order, new_status).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order status");
            ServiceError::DatabaseError(e)
        })?;

        self.publish(events).await;
        self.to_response(db, updated).await
    }

    /// Validates and writes an order status change inside the caller's transaction.
    ///
    /// Cancelling restores stock only when the order was still pending, fails every
    /// payment and resets shipping to UNDELIVERED.
    pub(crate) async fn apply_status(
        &self,
        txn: &DatabaseTransaction,
        actor: &Requester,
        order: order::Model,
        new_status: OrderStatus,
    ) -> Result<(order::Model, Vec<Event>), ServiceError> {
        check_status_change(order.status, new_status).into_result()?;
        let payments = store::payments_for_order(txn, order.id).await?;
        let effective = effective_payment_status(&payments);
        check_combination(new_status, order.shipping_status, effective).into_result()?;

        let order_id = order.id;
        let old_status = order.status;
        let mut events = vec![Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        }];

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);

        if new_status == OrderStatus::Cancelled {
            let restocked = old_status == OrderStatus::PendingConfirmation;
            if restocked {
                for line in store::live_lines(txn, order_id).await? {
                    self.catalog
                        .restore_stock(txn, line.product_id, line.quantity)
                        .await?;
                }
            }

            store::set_payments_status(txn, order_id, PaymentStatus::Failed).await?;
            active.shipping_status = Set(ShippingStatus::Undelivered);

            let refund_required = effective == PaymentStatus::Success;
            if refund_required {
                warn!(order_id, "cancelled order was already paid; refund must be issued manually");
            }
            events.push(Event::OrderCancelled {
                order_id,
                restocked,
                refund_required,
            });
        }

        let updated = active
            .update(txn)
            .await
            .map_err(|e| db_error("Failed to update order status", e))?;

        info!(order_id, %old_status, %new_status, actor = %actor.role, "order status changed");
        Ok((updated, events))
    }

    #[instrument(skip(self), fields(order_id = order_id, new_shipping = %new_shipping))]
    pub async fn update_shipping_status(
        &self,
        requester: &Requester,
        order_id: i32,
        new_shipping: ShippingStatus,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = store::find_order(&txn, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        check_shipping_precondition(order.status, new_shipping).into_result()?;
        let payments = store::payments_for_order(&txn, order_id).await?;
        let effective = effective_payment_status(&payments);
        check_combination(order.status, new_shipping, effective).into_result()?;

        let old_shipping = order.shipping_status;
        let mut active: order::ActiveModel = order.into();
        active.shipping_status = Set(new_shipping);
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| db_error("Failed to update shipping status", e))?;

        let mut events = vec![Event::ShippingStatusChanged {
            order_id,
            old_status: old_shipping,
            new_status: new_shipping,
        }];
        if new_shipping == ShippingStatus::Delivered {
            events.extend(self.settle_cash_on_delivery(&txn, &updated).await?);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit shipping status");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, %old_shipping, %new_shipping, "shipping status changed");
        self.publish(events).await;
        self.to_response(db, updated).await
    }

    /// Cash collected at the door settles pay-on-delivery payments.
    async fn settle_cash_on_delivery(
        &self,
        txn: &DatabaseTransaction,
        order: &order::Model,
    ) -> Result<Vec<Event>, ServiceError> {
        let rows = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::IsDeleted.eq(false))
            .find_also_related(payment_method::Entity)
            .all(txn)
            .await
            .map_err(|e| db_error("Failed to load payments", e))?;

        let mut events = Vec::new();
        for (row, method) in rows {
            let is_cod = method.map(|m| m.is_cash_on_delivery()).unwrap_or(false);
            if !is_cod || row.status == PaymentStatus::Success {
                continue;
            }

            let check = check_payment_update(order.status, order.shipping_status, PaymentStatus::Success);
            if let Err(e) = check.into_result() {
                warn!(payment_id = row.id, error = %e, "COD payment left unsettled");
                continue;
            }

            let payment_id = row.id;
            let mut active: payment::ActiveModel = row.into();
            active.status = Set(PaymentStatus::Success);
            active.payment_date = Set(Utc::now());
            active
                .update(txn)
                .await
                .map_err(|e| db_error("Failed to settle COD payment", e))?;

            info!(payment_id, order_id = order.id, "COD payment settled on delivery");
            events.push(Event::PaymentStatusChanged {
                payment_id,
                order_id: order.id,
                new_status: PaymentStatus::Success,
            });
        }
        Ok(events)
    }

    /// Soft-deletes the order's lines, then the order.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn delete_order(&self, requester: &Requester, order_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = store::find_order(&txn, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        order_line::Entity::update_many()
            .col_expr(order_line::Column::IsDeleted, Expr::value(true))
            .col_expr(order_line::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order_line::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(|e| db_error("Failed to delete order lines", e))?;

        let mut active: order::ActiveModel = order.into();
        active.is_deleted = Set(true);
        active
            .update(&txn)
            .await
            .map_err(|e| db_error("Failed to delete order", e))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order deletion");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, "order deleted");
        self.publish(vec![Event::OrderDeleted { order_id }]).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn request(items: Vec<CreateOrderLine>) -> CreateOrderRequest {
        CreateOrderRequest {
            items,
            total: None,
            discount_amount: None,
            final_total: None,
            discount_id: None,
            discount_code: None,
            shipping_name: Some("Lan".into()),
            shipping_address: Some("12 Garden Street".into()),
            shipping_phone: Some("0900000000".into()),
            payment: None,
        }
    }

    fn item(quantity: i32) -> CreateOrderLine {
        CreateOrderLine {
            product_id: 1,
            quantity,
            price_at_order: None,
            sub_total: None,
            note: None,
        }
    }

    #[test]
    fn rejects_empty_orders_and_bad_quantities() {
        assert_matches!(
            validate_create_request(&request(vec![])),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            validate_create_request(&request(vec![item(0)])),
            Err(ServiceError::ValidationError(_))
        );
        assert!(validate_create_request(&request(vec![item(2)])).is_ok());
    }

    #[test]
    fn rejects_negative_advisory_amounts() {
        let mut req = request(vec![item(1)]);
        req.final_total = Some(dec!(-1));
        assert_matches!(
            validate_create_request(&req),
            Err(ServiceError::ValidationError(_))
        );

        let mut line = item(1);
        line.price_at_order = Some(dec!(-5));
        assert_matches!(
            validate_create_request(&request(vec![line])),
            Err(ServiceError::ValidationError(_))
        );
    }
}
