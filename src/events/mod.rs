use crate::entities::{
    order::{OrderStatus, ShippingStatus},
    payment::PaymentStatus,
};
use crate::gateway::PaymentPurpose;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of propagating a closed channel.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("{}", e);
        }
    }
}

/// Creates a bounded channel and the sender wrapper around it.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Domain events published after a state change commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i32,
        user_id: i32,
        final_total: Decimal,
        deposit_required: bool,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    ShippingStatusChanged {
        order_id: i32,
        old_status: ShippingStatus,
        new_status: ShippingStatus,
    },
    OrderCancelled {
        order_id: i32,
        restocked: bool,
        /// A payment already succeeded and must be refunded out of band
        refund_required: bool,
    },
    OrderDeleted {
        order_id: i32,
    },
    PaymentStatusChanged {
        payment_id: i32,
        order_id: i32,
        new_status: PaymentStatus,
    },
    DepositSettled {
        deposit_id: i32,
        order_id: i32,
        amount: Decimal,
        gateway_trans_id: String,
    },
    CallbackRejected {
        gateway_order_id: String,
        purpose: PaymentPurpose,
    },
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCancelled {
                order_id,
                refund_required: true,
                ..
            } => {
                warn!(order_id, "cancelled order has a settled payment; refund must be issued manually");
            }
            Event::CallbackRejected {
                gateway_order_id,
                purpose,
            } => {
                warn!(%gateway_order_id, %purpose, "gateway callback rejected");
            }
            other => info!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let (sender, mut rx) = channel(4);
        sender.send_or_log(Event::OrderDeleted { order_id: 1 }).await;
        sender
            .send_or_log(Event::OrderCancelled {
                order_id: 2,
                restocked: true,
                refund_required: false,
            })
            .await;

        assert_eq!(rx.recv().await, Some(Event::OrderDeleted { order_id: 1 }));
        assert!(matches!(
            rx.recv().await,
            Some(Event::OrderCancelled { order_id: 2, .. })
        ));
    }

    #[tokio::test]
    async fn closed_channel_is_reported_not_raised() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(sender.send(Event::OrderDeleted { order_id: 9 }).await.is_err());
        sender.send_or_log(Event::OrderDeleted { order_id: 9 }).await;
    }
}
