//! Plant shop order service
//!
//! Order lifecycle, deposits for large orders and reconciliation of payment
//! gateway callbacks, served over axum and persisted with sea-orm.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires services, gateway and event channel around an open connection.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn gateway::PaymentGateway>,
        event_sender: Arc<events::EventSender>,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            gateway,
            config.deposit.clone(),
            Some(event_sender.clone()),
        );
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

/// Standard API response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::delete_order),
        )
        .route(
            "/orders/user/:user_id",
            get(handlers::orders::get_orders_by_user),
        )
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/shipping-status",
            put(handlers::orders::update_shipping_status),
        )
        .route(
            "/orders/:id/lines",
            get(handlers::order_lines::list_order_lines),
        )
        .route(
            "/order-lines/:id",
            get(handlers::order_lines::get_order_line)
                .put(handlers::order_lines::update_order_line)
                .delete(handlers::order_lines::delete_order_line),
        );

    let deposits = Router::new()
        .route(
            "/deposits/:order_id/gateway",
            post(handlers::deposits::create_deposit_payment),
        )
        .route(
            "/deposits/order/:order_id",
            get(handlers::deposits::get_deposit_by_order),
        );

    let payments = Router::new()
        .route("/payments", get(handlers::payments::list_payments))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/status",
            put(handlers::payments::update_payment_status),
        )
        .route(
            "/payments/order/:order_id",
            get(handlers::payments::get_payments_by_order).post(handlers::payments::create_payment),
        )
        .route(
            "/payment-methods",
            get(handlers::payments::list_payment_methods),
        )
        .route(
            "/payments/gateway/create",
            post(handlers::payments::create_gateway_payment),
        );

    let gateway = Router::new()
        .route(
            "/payments/gateway/callback",
            post(handlers::callbacks::gateway_callback),
        )
        .route(
            "/payments/gateway/return",
            get(handlers::callbacks::gateway_return),
        );

    Router::new()
        .merge(orders)
        .merge(deposits)
        .merge(payments)
        .merge(gateway)
}

/// Full application router with tracing, request ids and CORS applied.
pub fn app_router(state: AppState) -> Router {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::openapi_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors_layer)
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": { "database": db_status },
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn message_is_optional() {
        let body = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert!(body.get("message").is_none());

        let body = serde_json::to_value(ApiResponse::success(1).with_message("done")).unwrap();
        assert_eq!(body["message"], "done");
    }
}
