pub mod callbacks;
pub mod deposits;
pub mod order_lines;
pub mod orders;
pub mod payments;

use crate::{
    config::DepositPolicy,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        catalog::{CartGateway, CatalogGateway, DiscountGateway, SeaOrmCart, SeaOrmCatalog, SeaOrmDiscounts},
        deposits::DepositService,
        order_lines::OrderLineService,
        orders::OrderService,
        payments::PaymentService,
        post_commit::PostCommitRunner,
        reconciliation::ReconciliationService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_lines: Arc<OrderLineService>,
    pub deposits: Arc<DepositService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
}

impl AppServices {
    /// Wires the services against the shop's own tables.
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        deposit_policy: DepositPolicy,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self::with_collaborators(
            db_pool,
            gateway,
            deposit_policy,
            event_sender,
            Arc::new(SeaOrmCatalog),
            Arc::new(SeaOrmDiscounts),
            Arc::new(SeaOrmCart),
        )
    }

    pub fn with_collaborators(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        deposit_policy: DepositPolicy,
        event_sender: Option<Arc<EventSender>>,
        catalog: Arc<dyn CatalogGateway>,
        discounts: Arc<dyn DiscountGateway>,
        cart: Arc<dyn CartGateway>,
    ) -> Self {
        let deposits = DepositService::new(
            db_pool.clone(),
            gateway.clone(),
            deposit_policy.clone(),
            event_sender.clone(),
        );
        let payments = PaymentService::new(
            db_pool.clone(),
            gateway.clone(),
            deposits.clone(),
            event_sender.clone(),
        );
        let post_commit =
            PostCommitRunner::new(db_pool.clone(), cart, payments.clone(), deposits.clone());
        let orders = OrderService::new(
            db_pool.clone(),
            catalog.clone(),
            discounts,
            post_commit,
            deposit_policy,
            event_sender.clone(),
        );
        let order_lines = OrderLineService::new(db_pool.clone(), catalog);
        let reconciliation = ReconciliationService::new(
            db_pool,
            gateway,
            orders.clone(),
            deposits.clone(),
            event_sender,
        );

        Self {
            orders: Arc::new(orders),
            order_lines: Arc::new(order_lines),
            deposits: Arc::new(deposits),
            payments: Arc::new(payments),
            reconciliation: Arc::new(reconciliation),
        }
    }
}
