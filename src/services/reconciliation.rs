//! Applies asynchronous gateway callbacks to deposits, payments and orders.

use crate::{
    auth::Requester,
    db::DbPool,
    entities::{
        order::OrderStatus,
        payment::PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{parse_gateway_order_id, GatewayCallback, PaymentGateway, PaymentPurpose},
    services::{
        deposits::{DepositService, SettleOutcome},
        order_status::effective_payment_status,
        orders::OrderService,
        store,
    },
};
use metrics::counter;
use sea_orm::TransactionTrait;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// How a verified callback was handled. Every variant is acknowledged as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    DepositSettled { order_id: i32, deposit_id: i32 },
    DuplicateDeposit { order_id: i32 },
    /// Failed deposit attempts or settled ones without a transaction id.
    DepositUnchanged { order_id: i32 },
    OrderConfirmed { order_id: i32 },
    /// Payments recorded but the order status was left alone.
    PaymentsRecorded { order_id: i32, status: PaymentStatus },
    /// A failure arriving after the order was already paid.
    StaleFailureIgnored { order_id: i32 },
    UnknownOrder,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    deposits: DepositService,
    event_sender: Option<Arc<EventSender>>,
}

impl ReconciliationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        deposits: DepositService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            orders,
            deposits,
            event_sender,
        }
    }

    #[instrument(skip(self, callback), fields(gateway_order_id = %callback.order_id, result_code = ?callback.result_code))]
    pub async fn handle_callback(
        &self,
        callback: GatewayCallback,
    ) -> Result<CallbackOutcome, ServiceError> {
        counter!("plantshop_callbacks.received", 1);
        let purpose = callback.purpose();

        if !self.gateway.verify_callback(&callback) {
            warn!(%purpose, "callback signature mismatch");
            counter!("plantshop_callbacks.rejected", 1);
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::CallbackRejected {
                        gateway_order_id: callback.order_id.clone(),
                        purpose,
                    })
                    .await;
            }
            return Err(ServiceError::InvalidSignature);
        }

        let Some(order_id) = self.resolve_order_id(&callback.order_id).await? else {
            warn!("callback for an order id that cannot be resolved");
            return Ok(CallbackOutcome::UnknownOrder);
        };
        match store::find_order(&*self.db_pool, order_id).await {
            Ok(_) => {}
            Err(ServiceError::NotFound(_)) => {
                warn!(order_id, "callback for a missing order");
                return Ok(CallbackOutcome::UnknownOrder);
            }
            Err(e) => return Err(e),
        }

        info!(order_id, %purpose, success = callback.is_success(), "processing gateway callback");
        match purpose {
            PaymentPurpose::Deposit => self.handle_deposit(order_id, &callback).await,
            PaymentPurpose::OrderPayment if callback.is_success() => {
                self.handle_order_paid(order_id).await
            }
            PaymentPurpose::OrderPayment => self.handle_order_failed(order_id).await,
        }
    }

    /// Stored request tracking first, then the `{PURPOSE}_{id}_{millis}` convention.
    async fn resolve_order_id(&self, gateway_order_id: &str) -> Result<Option<i32>, ServiceError> {
        if gateway_order_id.trim().is_empty() {
            return Ok(None);
        }
        if let Some(order_id) =
            store::order_id_for_gateway_id(&*self.db_pool, gateway_order_id).await?
        {
            return Ok(Some(order_id));
        }
        Ok(parse_gateway_order_id(gateway_order_id))
    }

    async fn handle_deposit(
        &self,
        order_id: i32,
        callback: &GatewayCallback,
    ) -> Result<CallbackOutcome, ServiceError> {
        if !callback.is_success() {
            info!(order_id, message = ?callback.message, "deposit payment failed; deposit stays unpaid");
            return Ok(CallbackOutcome::DepositUnchanged { order_id });
        }

        let Some(trans_id) = callback.trans_id else {
            warn!(order_id, "successful deposit callback without a transaction id");
            return Ok(CallbackOutcome::DepositUnchanged { order_id });
        };

        let outcome = self
            .deposits
            .settle_deposit(
                order_id,
                &trans_id.to_string(),
                callback.amount,
                &callback.order_id,
            )
            .await?;

        Ok(match outcome {
            SettleOutcome::Settled(deposit) => CallbackOutcome::DepositSettled {
                order_id,
                deposit_id: deposit.id,
            },
            SettleOutcome::Duplicate => CallbackOutcome::DuplicateDeposit { order_id },
        })
    }

    async fn handle_order_paid(&self, order_id: i32) -> Result<CallbackOutcome, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = store::find_order(&txn, order_id).await?;
        let touched = store::set_payments_status(&txn, order_id, PaymentStatus::Success).await?;

        let mut events = Vec::new();
        let outcome = match order.status {
            OrderStatus::PendingConfirmation => {
                let (_, status_events) = self
                    .orders
                    .apply_status(&txn, &Requester::system(), order, OrderStatus::Confirmed)
                    .await?;
                events.extend(status_events);
                CallbackOutcome::OrderConfirmed { order_id }
            }
            OrderStatus::Cancelled => {
                warn!(order_id, "payment settled for a cancelled order; refund must be issued manually");
                events.push(Event::OrderCancelled {
                    order_id,
                    restocked: false,
                    refund_required: true,
                });
                CallbackOutcome::PaymentsRecorded {
                    order_id,
                    status: PaymentStatus::Success,
                }
            }
            OrderStatus::Confirmed | OrderStatus::Delivered => CallbackOutcome::PaymentsRecorded {
                order_id,
                status: PaymentStatus::Success,
            },
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment callback");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, payments = touched, "order payment settled");
        self.publish(events).await;
        Ok(outcome)
    }

    async fn handle_order_failed(&self, order_id: i32) -> Result<CallbackOutcome, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        let payments = store::payments_for_order(&txn, order_id).await?;
        if effective_payment_status(&payments) == PaymentStatus::Success {
            info!(order_id, "late failure callback for a paid order ignored");
            return Ok(CallbackOutcome::StaleFailureIgnored { order_id });
        }

        let touched = store::set_payments_status(&txn, order_id, PaymentStatus::Failed).await?;
        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit payment callback");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, payments = touched, "order payment failed");
        Ok(CallbackOutcome::PaymentsRecorded {
            order_id,
            status: PaymentStatus::Failed,
        })
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            for event in events {
                sender.send_or_log(event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepositPolicy;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::{order, order::ShippingStatus, payment};
    use crate::gateway::MockPaymentGateway;
    use crate::handlers::AppServices;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

    async fn fresh_db() -> Arc<DatabaseConnection> {
        let db = establish_connection_with_config(&DbConfig::in_memory())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        Arc::new(db)
    }

    async fn seed_order(db: &DatabaseConnection) -> i32 {
        let now = Utc::now();
        order::ActiveModel {
            total: Set(dec!(100000)),
            discount_amount: Set(dec!(0)),
            final_total: Set(dec!(100000)),
            order_date: Set(now),
            status: Set(OrderStatus::PendingConfirmation),
            shipping_status: Set(ShippingStatus::Undelivered),
            user_id: Set(7),
            is_deleted: Set(false),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
        .id
    }

    fn service(
        db: Arc<DatabaseConnection>,
        gateway: MockPaymentGateway,
    ) -> Arc<ReconciliationService> {
        AppServices::new(db, Arc::new(gateway), DepositPolicy::default(), None).reconciliation
    }

    #[tokio::test]
    async fn stored_gateway_ids_win_over_parsing() {
        let db = fresh_db().await;
        let first = seed_order(&db).await;
        let second = seed_order(&db).await;

        let misleading = format!("ORDER_{first}_1700000000000");
        payment::ActiveModel {
            order_id: Set(second),
            method_id: Set(1),
            amount: Set(dec!(100000)),
            payment_date: Set(Utc::now()),
            status: Set(PaymentStatus::Processing),
            gateway_order_id: Set(Some(misleading.clone())),
            is_deleted: Set(false),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .unwrap();

        let reconciliation = service(db, MockPaymentGateway::new());
        assert_eq!(
            reconciliation.resolve_order_id(&misleading).await.unwrap(),
            Some(second)
        );
        assert_eq!(
            reconciliation
                .resolve_order_id(&format!("DEPOSIT_{first}_1700000000000"))
                .await
                .unwrap(),
            Some(first)
        );
        assert_eq!(reconciliation.resolve_order_id("  ").await.unwrap(), None);
        assert_eq!(reconciliation.resolve_order_id("not-an-id").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unverified_callbacks_change_nothing() {
        let db = fresh_db().await;
        let order_id = seed_order(&db).await;

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_verify_callback().times(1).returning(|_| false);
        gateway.expect_create_payment().never();

        let callback = GatewayCallback {
            order_id: format!("ORDER_{order_id}_1700000000000"),
            result_code: Some(0),
            ..Default::default()
        };
        assert_matches!(
            service(db.clone(), gateway).handle_callback(callback).await,
            Err(ServiceError::InvalidSignature)
        );

        let order = store::find_order(&*db, order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingConfirmation);
    }

    #[tokio::test]
    async fn verified_callbacks_for_missing_orders_are_acknowledged() {
        let db = fresh_db().await;

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_verify_callback().returning(|_| true);

        let callback = GatewayCallback {
            order_id: "ORDER_4242_1700000000000".into(),
            result_code: Some(0),
            ..Default::default()
        };
        assert_eq!(
            service(db, gateway).handle_callback(callback).await.unwrap(),
            CallbackOutcome::UnknownOrder
        );
    }
}
