//! Property-based tests for pricing, deposits and status rules.

use chrono::Utc;
use plantshop_orders::{
    config::DepositPolicy,
    entities::{
        order::{OrderStatus, ShippingStatus},
        order_line,
        payment::PaymentStatus,
    },
    gateway::{gateway_order_id, parse_gateway_order_id, PaymentPurpose},
    services::{
        deposits::{deposit_amount, requires_deposit, total_quantity},
        order_status::{check_combination, check_payment_update},
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn line(id: i32, quantity: i32, is_deleted: bool) -> order_line::Model {
    order_line::Model {
        id,
        order_id: 1,
        product_id: id,
        quantity,
        price_at_order: dec!(1000),
        sub_total: Decimal::from(quantity) * dec!(1000),
        note: None,
        is_deleted,
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn lines_strategy() -> impl Strategy<Value = Vec<order_line::Model>> {
    prop::collection::vec((1i32..50, any::<bool>()), 0..8).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (qty, deleted))| line(i as i32 + 1, qty, deleted))
            .collect()
    })
}

fn money() -> impl Strategy<Value = Decimal> {
    (0i64..100_000_000).prop_map(Decimal::from)
}

fn order_status() -> impl Strategy<Value = OrderStatus> {
    prop_oneof![
        Just(OrderStatus::PendingConfirmation),
        Just(OrderStatus::Confirmed),
        Just(OrderStatus::Delivered),
        Just(OrderStatus::Cancelled),
    ]
}

fn shipping_status() -> impl Strategy<Value = ShippingStatus> {
    prop_oneof![
        Just(ShippingStatus::Undelivered),
        Just(ShippingStatus::PreparingOrder),
        Just(ShippingStatus::Shipping),
        Just(ShippingStatus::Delivered),
        Just(ShippingStatus::Cancelled),
    ]
}

fn payment_status() -> impl Strategy<Value = PaymentStatus> {
    prop_oneof![
        Just(PaymentStatus::Processing),
        Just(PaymentStatus::Success),
        Just(PaymentStatus::Failed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn deposit_follows_live_quantity(lines in lines_strategy(), threshold in 1i32..100) {
        let policy = DepositPolicy { quantity_threshold: threshold, ..Default::default() };
        let live: i64 = lines.iter().filter(|l| !l.is_deleted).map(|l| i64::from(l.quantity)).sum();

        prop_assert_eq!(total_quantity(&lines), live);
        prop_assert_eq!(requires_deposit(&lines, &policy), live >= i64::from(threshold));
    }

    #[test]
    fn deleted_lines_never_trigger_a_deposit(quantities in prop::collection::vec(1i32..1000, 1..5)) {
        let lines: Vec<_> = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| line(i as i32 + 1, *q, true))
            .collect();
        prop_assert!(!requires_deposit(&lines, &DepositPolicy::default()));
    }

    #[test]
    fn deposit_is_whole_and_bounded(total in money(), discount in money()) {
        let amount = deposit_amount(total, discount, dec!(0.5));

        prop_assert!(amount >= Decimal::ZERO);
        prop_assert_eq!(amount, amount.trunc());
        let net = (total - discount).max(Decimal::ZERO);
        prop_assert!(amount <= net);
        prop_assert!((amount - net * dec!(0.5)).abs() <= dec!(0.5));
    }

    #[test]
    fn payment_updates_are_never_looser_than_combinations(
        order in order_status(),
        shipping in shipping_status(),
        payment in payment_status(),
    ) {
        if check_payment_update(order, shipping, payment).is_allowed() {
            prop_assert!(check_combination(order, shipping, payment).is_allowed());
        }
    }

    #[test]
    fn nothing_in_fulfilment_can_be_cancelled(payment in payment_status()) {
        for shipping in [ShippingStatus::PreparingOrder, ShippingStatus::Shipping, ShippingStatus::Delivered] {
            prop_assert!(!check_combination(OrderStatus::Cancelled, shipping, payment).is_allowed());
        }
    }

    #[test]
    fn gateway_order_ids_carry_the_order(order_id in 1i32..i32::MAX, millis in 0i64..4_102_444_800_000) {
        for purpose in [PaymentPurpose::OrderPayment, PaymentPurpose::Deposit] {
            let id = gateway_order_id(purpose, order_id, millis);
            prop_assert_eq!(parse_gateway_order_id(&id), Some(order_id));
        }
    }
}
