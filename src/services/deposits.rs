//! Deposits for large orders: the requirement rule, link creation and settlement.

use crate::{
    auth::Requester,
    config::DepositPolicy,
    db::DbPool,
    entities::{deposit, order, order_line},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CreatePaymentRequest, CreatePaymentResponse, PaymentGateway, PaymentPurpose},
    services::store::{self, db_error},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// Total units across the order's live lines.
pub fn total_quantity(lines: &[order_line::Model]) -> i64 {
    lines
        .iter()
        .filter(|l| !l.is_deleted)
        .map(|l| i64::from(l.quantity))
        .sum()
}

pub fn requires_deposit(lines: &[order_line::Model], policy: &DepositPolicy) -> bool {
    total_quantity(lines) >= i64::from(policy.quantity_threshold)
}

/// `(total - discount) * ratio`, rounded half-up to whole currency units, never negative.
pub fn deposit_amount(total: Decimal, discount_amount: Decimal, ratio: Decimal) -> Decimal {
    ((total - discount_amount) * ratio)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DepositResponse {
    pub id: i32,
    pub order_id: i32,
    pub method_id: i32,
    pub method_name: Option<String>,
    pub amount: Decimal,
    pub paid: bool,
    pub gateway_trans_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl DepositResponse {
    fn from_model(model: deposit::Model, method_name: Option<String>) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            method_id: model.method_id,
            method_name,
            amount: model.amount,
            paid: model.paid,
            gateway_trans_id: model.gateway_trans_id,
            created_at: model.created_at,
            paid_at: model.paid_at,
        }
    }
}

/// Latest deposit of the order with its method name resolved.
pub async fn deposit_view<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Option<DepositResponse>, ServiceError> {
    let Some(model) = store::latest_deposit(conn, order_id).await? else {
        return Ok(None);
    };
    let method_name = store::find_method(conn, model.method_id)
        .await?
        .map(|m| m.method_name);
    Ok(Some(DepositResponse::from_model(model, method_name)))
}

/// Result of applying a successful deposit callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(deposit::Model),
    /// The transaction id was already recorded; nothing changed.
    Duplicate,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[derive(Clone)]
pub struct DepositService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    policy: DepositPolicy,
    event_sender: Option<Arc<EventSender>>,
}

impl DepositService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        policy: DepositPolicy,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            policy,
            event_sender,
        }
    }

    pub fn policy(&self) -> &DepositPolicy {
        &self.policy
    }

    /// Creates or reuses the unpaid deposit row and requests a gateway link for it.
    #[instrument(skip(self), fields(order_id = order_id, user_id = requester.user_id))]
    pub async fn create_deposit_payment(
        &self,
        requester: &Requester,
        order_id: i32,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = store::find_order(&txn, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        let deposit = self.prepare_unpaid_deposit(&txn, &order).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit deposit");
            ServiceError::DatabaseError(e)
        })?;

        let amount = deposit.amount.to_i64().ok_or_else(|| {
            ServiceError::InternalError(format!("deposit amount {} out of range", deposit.amount))
        })?;

        let link = self
            .gateway
            .create_payment(CreatePaymentRequest {
                order_id,
                amount,
                order_info: Some(format!("Deposit for order #{}", order_id)),
                purpose: PaymentPurpose::Deposit,
            })
            .await?;

        let mut active: deposit::ActiveModel = deposit.into();
        active.request_id = Set(Some(link.request_id.clone()));
        active.gateway_order_id = Set(Some(link.gateway_order_id.clone()));
        active
            .update(db)
            .await
            .map_err(|e| db_error("Failed to stamp deposit request tracking", e))?;

        info!(order_id, amount, gateway_order_id = %link.gateway_order_id, "deposit link created");
        Ok(link)
    }

    async fn prepare_unpaid_deposit<C: ConnectionTrait + TransactionTrait>(
        &self,
        conn: &C,
        order: &order::Model,
    ) -> Result<deposit::Model, ServiceError> {
        let lines = store::live_lines(conn, order.id).await?;
        if !requires_deposit(&lines, &self.policy) {
            return Err(ServiceError::ValidationError(format!(
                "Order {} does not require a deposit",
                order.id
            )));
        }

        if let Some(latest) = store::latest_deposit(conn, order.id).await? {
            if latest.paid {
                return Err(ServiceError::Conflict(format!(
                    "Deposit for order {} is already paid",
                    order.id
                )));
            }
        }

        let amount = deposit_amount(order.total, order.discount_amount, self.policy.ratio);
        let method = store::find_method_by_name(conn, &self.policy.method_name)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Deposit payment method '{}' not found",
                    self.policy.method_name
                ))
            })?;

        match store::latest_unpaid_deposit(conn, order.id).await? {
            Some(existing) => {
                // Line edits may have changed the total since the row was created.
                let mut active: deposit::ActiveModel = existing.into();
                active.amount = Set(amount);
                active.method_id = Set(method.id);
                active
                    .update(conn)
                    .await
                    .map_err(|e| db_error("Failed to refresh deposit", e))
            }
            None => self.insert_unpaid_deposit(conn, order.id, method.id, amount).await,
        }
    }

    /// Inserts the order's unpaid deposit row, or returns the one a concurrent
    /// request inserted first.
    async fn insert_unpaid_deposit<C: ConnectionTrait + TransactionTrait>(
        &self,
        conn: &C,
        order_id: i32,
        method_id: i32,
        amount: Decimal,
    ) -> Result<deposit::Model, ServiceError> {
        let savepoint = conn.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin deposit savepoint");
            ServiceError::DatabaseError(e)
        })?;

        let inserted = deposit::ActiveModel {
            order_id: Set(order_id),
            method_id: Set(method_id),
            amount: Set(amount),
            paid: Set(false),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&savepoint)
        .await;

        match inserted {
            Ok(model) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| db_error("Failed to create deposit", e))?;
                Ok(model)
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| db_error("Failed to roll back deposit savepoint", e))?;
                info!(order_id, "unpaid deposit created concurrently; reusing it");
                store::latest_unpaid_deposit(conn, order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict(format!(
                            "Deposit for order {} changed concurrently",
                            order_id
                        ))
                    })
            }
            Err(e) => Err(db_error("Failed to create deposit", e)),
        }
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_deposit_by_order(
        &self,
        requester: &Requester,
        order_id: i32,
    ) -> Result<DepositResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = store::find_order(db, order_id).await?;
        requester.ensure_can_act_on(order.user_id)?;

        deposit_view(db, order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No deposit for order {}", order_id)))
    }

    /// Applies a successful deposit callback.
    ///
    /// The gateway transaction id is the idempotency key: a second delivery, or a
    /// concurrent one losing the race on the unique index, is reported as
    /// [`SettleOutcome::Duplicate`].
    #[instrument(skip(self), fields(order_id = order_id, trans_id = %trans_id))]
    pub async fn settle_deposit(
        &self,
        order_id: i32,
        trans_id: &str,
        amount: Option<i64>,
        gateway_order_id: &str,
    ) -> Result<SettleOutcome, ServiceError> {
        let db = &*self.db_pool;

        let already = deposit::Entity::find()
            .filter(deposit::Column::GatewayTransId.eq(trans_id))
            .one(db)
            .await
            .map_err(|e| db_error("Failed to look up deposit by transaction id", e))?;
        if already.is_some() {
            info!("duplicate deposit callback ignored");
            counter!("plantshop_callbacks.duplicate", 1);
            return Ok(SettleOutcome::Duplicate);
        }

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let settled_amount = amount.map(Decimal::from);
        let now = Utc::now();
        let written = match store::latest_unpaid_deposit(&txn, order_id).await? {
            Some(existing) => {
                let mut active: deposit::ActiveModel = existing.into();
                active.paid = Set(true);
                active.gateway_trans_id = Set(Some(trans_id.to_string()));
                active.paid_at = Set(Some(now));
                if let Some(settled) = settled_amount {
                    active.amount = Set(settled);
                }
                active.update(&txn).await
            }
            None => {
                warn!("no unpaid deposit row; recording a settled one");
                let method = store::find_method_by_name(&txn, &self.policy.method_name)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Deposit payment method '{}' not found",
                            self.policy.method_name
                        ))
                    })?;
                let order = store::find_order(&txn, order_id).await?;
                let amount = match settled_amount {
                    Some(settled) => settled,
                    None => deposit_amount(order.total, order.discount_amount, self.policy.ratio),
                };
                deposit::ActiveModel {
                    order_id: Set(order_id),
                    method_id: Set(method.id),
                    amount: Set(amount),
                    paid: Set(true),
                    gateway_trans_id: Set(Some(trans_id.to_string())),
                    gateway_order_id: Set(Some(gateway_order_id.to_string())),
                    created_at: Set(now),
                    paid_at: Set(Some(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await
            }
        };

        let settled = match written {
            Ok(model) => model,
            Err(e) if is_unique_violation(&e) => {
                info!("concurrent duplicate deposit callback lost the race");
                counter!("plantshop_callbacks.duplicate", 1);
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "rollback after duplicate deposit failed");
                }
                return Ok(SettleOutcome::Duplicate);
            }
            Err(e) => return Err(db_error("Failed to settle deposit", e)),
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit deposit settlement");
            ServiceError::DatabaseError(e)
        })?;

        info!(deposit_id = settled.id, amount = %settled.amount, "deposit settled");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::DepositSettled {
                    deposit_id: settled.id,
                    order_id,
                    amount: settled.amount,
                    gateway_trans_id: trans_id.to_string(),
                })
                .await;
        }

        Ok(SettleOutcome::Settled(settled))
    }
}
