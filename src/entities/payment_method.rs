use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_methods")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub method_name: String,
    pub is_deleted: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

const CASH_ON_DELIVERY_KEYWORDS: [&str; 3] = ["cod", "cash on delivery", "thanh toán khi nhận"];

impl Model {
    /// Whether this method is settled in cash when the parcel is delivered.
    pub fn is_cash_on_delivery(&self) -> bool {
        let name = self.method_name.trim().to_lowercase();
        CASH_ON_DELIVERY_KEYWORDS
            .iter()
            .any(|keyword| name.contains(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("COD", true)]
    #[test_case("  Cash on Delivery ", true)]
    #[test_case("Thanh toán khi nhận hàng", true)]
    #[test_case("momo", false)]
    #[test_case("Bank transfer", false)]
    fn detects_cash_on_delivery(name: &str, expected: bool) {
        let method = Model {
            id: 1,
            method_name: name.to_string(),
            is_deleted: false,
        };
        assert_eq!(method.is_cash_on_delivery(), expected);
    }
}
