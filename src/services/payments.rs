use crate::{
    auth::Requester,
    db::DbPool,
    entities::{
        payment::{self, PaymentStatus},
        payment_method,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreatePaymentRequest, CreatePaymentResponse, PaymentGateway, PaymentPurpose},
    services::{
        deposits::DepositService,
        order_status::check_payment_update,
        store::{self, db_error},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPaymentRequest {
    pub method_id: i32,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePaymentStatusRequest {
    pub status: PaymentStatus,
}

/// Request for a gateway pay link.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GatewayPaymentRequest {
    pub order_id: i32,
    /// Whole currency units; defaults to the order's final total. Ignored for deposits.
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
    #[validate(length(max = 255))]
    pub order_info: Option<String>,
    #[serde(default)]
    pub purpose: PaymentPurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: i32,
    pub order_id: i32,
    pub method_id: i32,
    pub method_name: Option<String>,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub status: PaymentStatus,
    pub request_id: Option<String>,
    pub gateway_order_id: Option<String>,
}

impl PaymentResponse {
    fn from_parts(model: payment::Model, method: Option<payment_method::Model>) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            method_id: model.method_id,
            method_name: method.map(|m| m.method_name),
            amount: model.amount,
            payment_date: model.payment_date,
            status: model.status,
            request_id: model.request_id,
            gateway_order_id: model.gateway_order_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethodResponse {
    pub id: i32,
    pub method_name: String,
    pub cash_on_delivery: bool,
}

impl From<payment_method::Model> for PaymentMethodResponse {
    fn from(model: payment_method::Model) -> Self {
        Self {
            id: model.id,
            cash_on_delivery: model.is_cash_on_delivery(),
            method_name: model.method_name,
        }
    }
}

/// Inserts a PROCESSING payment row. Callers check authorization and amounts.
pub async fn insert_payment<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
    method_id: i32,
    amount: Decimal,
) -> Result<payment::Model, ServiceError> {
    if store::find_method(conn, method_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Payment method {} not found",
            method_id
        )));
    }

    payment::ActiveModel {
        order_id: Set(order_id),
        method_id: Set(method_id),
        amount: Set(amount),
        payment_date: Set(Utc::now()),
        status: Set(PaymentStatus::Processing),
        is_deleted: Set(false),
        ..Default::default()
    }
    .insert(conn)
    .await
    .map_err(|e| db_error("Failed to create payment", e))
}

/// Payment rows, methods and gateway pay links.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    deposits: DepositService,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        deposits: DepositService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            deposits,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(order_id = order_id, method_id = request.method_id))]
    pub async fn create_payment(
        &self,
        requester: &Requester,
        order_id: i32,
        request: NewPaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be greater than zero".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let order = store::find_order(db, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let created = insert_payment(db, order_id, request.method_id, request.amount).await?;
        info!(payment_id = created.id, "payment created");

        let method = store::find_method(db, created.method_id).await?;
        Ok(PaymentResponse::from_parts(created, method))
    }

    /// Records the payment intent captured at checkout.
    pub async fn record_payment(
        &self,
        order_id: i32,
        method_id: i32,
        amount: Decimal,
    ) -> Result<payment::Model, ServiceError> {
        insert_payment(&*self.db_pool, order_id, method_id, amount).await
    }

    #[instrument(skip(self), fields(payment_id = payment_id))]
    pub async fn get_payment(
        &self,
        requester: &Requester,
        payment_id: i32,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        let (found, method) = payment::Entity::find_by_id(payment_id)
            .filter(payment::Column::IsDeleted.eq(false))
            .find_also_related(payment_method::Entity)
            .one(db)
            .await
            .map_err(|e| db_error("Failed to load payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        let order = store::find_order(db, found.order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        Ok(PaymentResponse::from_parts(found, method))
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_payments_by_order(
        &self,
        requester: &Requester,
        order_id: i32,
    ) -> Result<Vec<PaymentResponse>, ServiceError> {
        let db = &*self.db_pool;
        let order = store::find_order(db, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let rows = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::IsDeleted.eq(false))
            .order_by_asc(payment::Column::Id)
            .find_also_related(payment_method::Entity)
            .all(db)
            .await
            .map_err(|e| db_error("Failed to load payments", e))?;

        Ok(rows
            .into_iter()
            .map(|(p, m)| PaymentResponse::from_parts(p, m))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_all_payments(
        &self,
        requester: &Requester,
    ) -> Result<Vec<PaymentResponse>, ServiceError> {
        requester.ensure_admin()?;

        let rows = payment::Entity::find()
            .filter(payment::Column::IsDeleted.eq(false))
            .order_by_desc(payment::Column::PaymentDate)
            .find_also_related(payment_method::Entity)
            .all(&*self.db_pool)
            .await
            .map_err(|e| db_error("Failed to load payments", e))?;

        Ok(rows
            .into_iter()
            .map(|(p, m)| PaymentResponse::from_parts(p, m))
            .collect())
    }

    /// Sets one payment's status, checked against its order's current state.
    #[instrument(skip(self), fields(payment_id = payment_id, status = %status))]
    pub async fn update_payment_status(
        &self,
        requester: &Requester,
        payment_id: i32,
        status: PaymentStatus,
    ) -> Result<PaymentResponse, ServiceError> {
        requester.ensure_privileged()?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let found = payment::Entity::find_by_id(payment_id)
            .filter(payment::Column::IsDeleted.eq(false))
            .one(&txn)
            .await
            .map_err(|e| db_error("Failed to load payment", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;
        let order = store::find_order(&txn, found.order_id).await?;

        check_payment_update(order.status, order.shipping_status, status).into_result()?;

        let mut active: payment::ActiveModel = found.into();
        active.status = Set(status);
        active.payment_date = Set(Utc::now());
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| db_error("Failed to update payment", e))?;
        let method = store::find_method(&txn, updated.method_id).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment update");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = updated.order_id, "payment status updated");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::PaymentStatusChanged {
                    payment_id: updated.id,
                    order_id: updated.order_id,
                    new_status: status,
                })
                .await;
        }

        Ok(PaymentResponse::from_parts(updated, method))
    }

    pub async fn list_payment_methods(&self) -> Result<Vec<PaymentMethodResponse>, ServiceError> {
        let methods = payment_method::Entity::find()
            .filter(payment_method::Column::IsDeleted.eq(false))
            .order_by_asc(payment_method::Column::Id)
            .all(&*self.db_pool)
            .await
            .map_err(|e| db_error("Failed to load payment methods", e))?;
        Ok(methods.into_iter().map(Into::into).collect())
    }

    /// Requests a gateway pay link for an order payment or a deposit.
    #[instrument(skip(self, request), fields(order_id = request.order_id, purpose = %request.purpose))]
    pub async fn create_gateway_payment(
        &self,
        requester: &Requester,
        request: GatewayPaymentRequest,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        request.validate()?;

        if request.purpose == PaymentPurpose::Deposit {
            return self
                .deposits
                .create_deposit_payment(requester, request.order_id)
                .await;
        }

        let db = &*self.db_pool;
        let order = store::find_order(db, request.order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let amount = match request.amount {
            Some(amount) => amount,
            None => order.final_total.round().to_i64().ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "order total {} out of range",
                    order.final_total
                ))
            })?,
        };
        if amount <= 0 {
            return Err(ServiceError::ValidationError(
                "Payment amount must be greater than zero".to_string(),
            ));
        }

        let link = self
            .gateway
            .create_payment(CreatePaymentRequest {
                order_id: order.id,
                amount,
                order_info: request.order_info,
                purpose: PaymentPurpose::OrderPayment,
            })
            .await?;

        let latest = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::IsDeleted.eq(false))
            .order_by_desc(payment::Column::Id)
            .one(db)
            .await
            .map_err(|e| db_error("Failed to load payment", e))?;
        match latest {
            Some(latest) => {
                let mut active: payment::ActiveModel = latest.into();
                active.request_id = Set(Some(link.request_id.clone()));
                active.gateway_order_id = Set(Some(link.gateway_order_id.clone()));
                active
                    .update(db)
                    .await
                    .map_err(|e| db_error("Failed to stamp payment request tracking", e))?;
            }
            None => warn!(order_id = order.id, "pay link issued for an order without payment rows"),
        }

        info!(order_id = order.id, amount, gateway_order_id = %link.gateway_order_id, "payment link created");
        Ok(link)
    }
}
