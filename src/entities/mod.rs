pub mod cart_item;
pub mod deposit;
pub mod discount;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod payment_method;
pub mod product;
