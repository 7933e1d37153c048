//! Status-combination rules for orders, shipments and payments.
//!
//! Pure functions over `(OrderStatus, ShippingStatus, PaymentStatus)`; persistence
//! and authorization live in the calling services.

use crate::entities::{
    order::{OrderStatus, ShippingStatus},
    payment::{self, PaymentStatus},
};
use crate::errors::ServiceError;

/// Outcome of checking a status combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Allowed,
    Rejected(&'static str),
}

impl Transition {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Transition::Allowed)
    }

    pub fn into_result(self) -> Result<(), ServiceError> {
        match self {
            Transition::Allowed => Ok(()),
            Transition::Rejected(reason) => {
                Err(ServiceError::InvalidStatusCombination(reason.to_string()))
            }
        }
    }
}

/// Rules applied to order and shipping status changes.
pub fn check_combination(
    order: OrderStatus,
    shipping: ShippingStatus,
    payment: PaymentStatus,
) -> Transition {
    use OrderStatus as O;
    use PaymentStatus as P;
    use ShippingStatus as S;

    match (order, shipping, payment) {
        (O::PendingConfirmation, S::Undelivered, _) => Transition::Allowed,
        (O::PendingConfirmation, _, _) => {
            Transition::Rejected("an unconfirmed order cannot leave UNDELIVERED")
        }
        (O::Confirmed, S::Delivered, P::Failed) => {
            Transition::Rejected("a delivered order cannot have a failed payment")
        }
        (O::Cancelled, S::Shipping | S::Delivered | S::PreparingOrder, _) => {
            Transition::Rejected("an order in fulfilment cannot be cancelled")
        }
        _ => Transition::Allowed,
    }
}

/// Order status moves out of CANCELLED are never allowed.
pub fn check_status_change(from: OrderStatus, to: OrderStatus) -> Transition {
    match (from, to) {
        (OrderStatus::Cancelled, _) => {
            Transition::Rejected("a cancelled order cannot change status")
        }
        _ => Transition::Allowed,
    }
}

/// Rules applied when a single payment's status is set by hand.
///
/// Stricter than [`check_combination`]: settled money must belong to a live,
/// confirmed order whose shipment was not cancelled.
pub fn check_payment_update(
    order: OrderStatus,
    shipping: ShippingStatus,
    payment: PaymentStatus,
) -> Transition {
    use OrderStatus as O;
    use PaymentStatus as P;
    use ShippingStatus as S;

    let base = check_combination(order, shipping, payment);
    if !base.is_allowed() {
        return base;
    }

    match (order, shipping, payment) {
        (O::PendingConfirmation, _, P::Success) => {
            Transition::Rejected("an unconfirmed order cannot be marked paid")
        }
        (O::Cancelled, _, P::Success) => {
            Transition::Rejected("a cancelled order cannot be marked paid")
        }
        (O::Confirmed, S::Cancelled, P::Success) => {
            Transition::Rejected("an order with a cancelled shipment cannot be marked paid")
        }
        _ => Transition::Allowed,
    }
}

/// Shipping moves past UNDELIVERED only for confirmed orders.
pub fn check_shipping_precondition(order: OrderStatus, shipping: ShippingStatus) -> Transition {
    if order != OrderStatus::Confirmed && shipping != ShippingStatus::Undelivered {
        Transition::Rejected("shipping can only start once the order is CONFIRMED")
    } else {
        Transition::Allowed
    }
}

/// Order-level payment status derived from its payment rows.
///
/// SUCCESS if any live row succeeded, otherwise the latest attempt's status,
/// otherwise PROCESSING.
pub fn effective_payment_status(payments: &[payment::Model]) -> PaymentStatus {
    let live = payments.iter().filter(|p| !p.is_deleted);

    if live.clone().any(|p| p.status == PaymentStatus::Success) {
        return PaymentStatus::Success;
    }

    live.max_by_key(|p| (p.payment_date, p.id))
        .map(|p| p.status)
        .unwrap_or(PaymentStatus::Processing)
}
