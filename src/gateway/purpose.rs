use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What a gateway transaction pays for. Echoed back by the gateway in `extraData`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentPurpose {
    #[default]
    OrderPayment,
    Deposit,
}

impl PaymentPurpose {
    /// Leading segment of the gateway-facing order id.
    pub fn order_prefix(&self) -> &'static str {
        match self {
            PaymentPurpose::OrderPayment => "ORDER",
            PaymentPurpose::Deposit => "DEPOSIT",
        }
    }

    pub fn extra_data(&self) -> String {
        format!("purpose={}", self)
    }

    /// Blank or unrecognised tags fall back to an order payment.
    pub fn from_extra_data(extra_data: Option<&str>) -> Self {
        match extra_data.map(str::trim) {
            Some(tag) if tag.to_uppercase().contains("DEPOSIT") => PaymentPurpose::Deposit,
            _ => PaymentPurpose::OrderPayment,
        }
    }
}

/// Builds `{PREFIX}_{order_id}_{epoch_millis}`, unique per attempt on the gateway side.
pub fn gateway_order_id(purpose: PaymentPurpose, order_id: i32, epoch_millis: i64) -> String {
    format!("{}_{}_{}", purpose.order_prefix(), order_id, epoch_millis)
}

/// Recovers the internal order id from a gateway order id.
///
/// Accepts the prefixed form as well as a bare integer.
pub fn parse_gateway_order_id(gateway_order_id: &str) -> Option<i32> {
    let trimmed = gateway_order_id.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with("ORDER_") || trimmed.starts_with("DEPOSIT_") {
        return trimmed.split('_').nth(1)?.parse().ok();
    }

    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, PaymentPurpose::OrderPayment)]
    #[test_case(Some(""), PaymentPurpose::OrderPayment)]
    #[test_case(Some("   "), PaymentPurpose::OrderPayment)]
    #[test_case(Some("purpose=DEPOSIT"), PaymentPurpose::Deposit)]
    #[test_case(Some("purpose=deposit"), PaymentPurpose::Deposit)]
    #[test_case(Some("purpose=ORDER_PAYMENT"), PaymentPurpose::OrderPayment)]
    #[test_case(Some("garbage"), PaymentPurpose::OrderPayment)]
    fn purpose_from_extra_data(tag: Option<&str>, expected: PaymentPurpose) {
        assert_eq!(PaymentPurpose::from_extra_data(tag), expected);
    }

    #[test_case("ORDER_35_1733831974000", Some(35))]
    #[test_case("DEPOSIT_7_1733831974000", Some(7))]
    #[test_case("42", Some(42))]
    #[test_case(" 42 ", Some(42))]
    #[test_case("ORDER_x_1", None)]
    #[test_case("REFUND_3_1", None)]
    #[test_case("", None)]
    fn parses_gateway_order_ids(raw: &str, expected: Option<i32>) {
        assert_eq!(parse_gateway_order_id(raw), expected);
    }

    #[test]
    fn gateway_order_id_round_trips_order_id() {
        let id = gateway_order_id(PaymentPurpose::Deposit, 12, 1_733_831_974_000);
        assert_eq!(id, "DEPOSIT_12_1733831974000");
        assert_eq!(parse_gateway_order_id(&id), Some(12));
        assert_eq!(PaymentPurpose::Deposit.extra_data(), "purpose=DEPOSIT");
    }
}
