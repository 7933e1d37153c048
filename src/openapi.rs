use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Plant Shop Orders API",
        version = "0.1.0",
        description = r#"
Order lifecycle and payment reconciliation for the plant shop.

## Identity

Authentication happens upstream. Every endpoint except the gateway callback and
return redirect expects the forwarded principal:

```
x-user-id: 42
x-user-role: USER | ADMIN
```

## Errors

```json
{
  "error": "Conflict",
  "message": "Invalid status combination: an order in fulfilment cannot be cancelled",
  "request_id": "5f0c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order lifecycle"),
        (name = "order-lines", description = "Line edits while an order is pending"),
        (name = "deposits", description = "Deposits for large orders"),
        (name = "payments", description = "Payments and payment methods"),
        (name = "gateway", description = "Endpoints called by the payment gateway")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_orders_by_user,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_shipping_status,
        crate::handlers::orders::delete_order,

        crate::handlers::order_lines::list_order_lines,
        crate::handlers::order_lines::get_order_line,
        crate::handlers::order_lines::update_order_line,
        crate::handlers::order_lines::delete_order_line,

        crate::handlers::deposits::create_deposit_payment,
        crate::handlers::deposits::get_deposit_by_order,

        crate::handlers::payments::create_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::get_payments_by_order,
        crate::handlers::payments::update_payment_status,
        crate::handlers::payments::list_payment_methods,
        crate::handlers::payments::create_gateway_payment,

        crate::handlers::callbacks::gateway_callback,
        crate::handlers::callbacks::gateway_return,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::ResponseMeta,
            crate::entities::order::OrderStatus,
            crate::entities::order::ShippingStatus,
            crate::entities::payment::PaymentStatus,
            crate::gateway::PaymentPurpose,
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_order_and_gateway_paths() {
        let doc = ApiDocV1::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/api/v1/orders"));
        assert!(paths.contains_key("/api/v1/orders/{id}/shipping-status"));
        assert!(paths.contains_key("/api/v1/payments/gateway/callback"));
        assert!(paths.contains_key("/api/v1/deposits/{order_id}/gateway"));
    }
}
