#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use plantshop_orders::{
    config::AppConfig,
    db::{self, DbConfig, DbPool},
    entities::product,
    events,
    gateway::{MockGateway, PaymentGateway},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const MOMO_METHOD_ID: i32 = 1;
pub const COD_METHOD_ID: i32 = 2;
pub const CUSTOMER_ID: i32 = 7;
pub const ADMIN_ID: i32 = 1;

/// Who a test request is sent as.
#[derive(Debug, Clone, Copy)]
pub enum As {
    Customer,
    OtherCustomer,
    Admin,
    Anonymous,
}

impl As {
    fn headers(self) -> Option<(String, &'static str)> {
        match self {
            As::Customer => Some((CUSTOMER_ID.to_string(), "USER")),
            As::OtherCustomer => Some(((CUSTOMER_ID + 1).to_string(), "USER")),
            As::Admin => Some((ADMIN_ID.to_string(), "ADMIN")),
            As::Anonymous => None,
        }
    }
}

/// Application wired to a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DbPool>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(MockGateway::new(
            "http://localhost:8080/api/v1/payments/gateway/return",
        )))
        .await
    }

    pub async fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let mut config = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        config.gateway.mock_mode = true;

        let (sender, rx) = events::channel(64);
        let event_task = tokio::spawn(events::process_events(rx));

        let state = AppState::build(db.clone(), config, gateway, Arc::new(sender));
        let router = plantshop_orders::app_router(state.clone());

        Self {
            router,
            state,
            db,
            _event_task: event_task,
        }
    }

    pub async fn seed_product(&self, name: &str, price: i64, quantity: i32) -> i32 {
        let model = product::ActiveModel {
            name: Set(name.to_string()),
            price: Set(Decimal::from(price)),
            quantity: Set(quantity),
            is_deleted: Set(false),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        model.id
    }

    pub async fn stock_of(&self, product_id: i32) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .expect("load product")
            .expect("product exists")
            .quantity
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        who: As,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = who.headers() {
            builder = builder.header("x-user-id", id).header("x-user-role", role);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.send(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn get(&self, uri: &str, who: As) -> (StatusCode, Value) {
        self.request(Method::GET, uri, who, None).await
    }

    pub async fn post(&self, uri: &str, who: As, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, who, Some(body)).await
    }

    pub async fn put(&self, uri: &str, who: As, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, who, Some(body)).await
    }

    /// Places an order as the customer and returns the response `data`.
    pub async fn place_order(&self, product_id: i32, quantity: i32, method_id: i32) -> Value {
        let (status, body) = self
            .post(
                "/api/v1/orders",
                As::Customer,
                json!({
                    "items": [{ "product_id": product_id, "quantity": quantity }],
                    "shipping_name": "Linh Tran",
                    "shipping_address": "12 Garden Street",
                    "shipping_phone": "0900123456",
                    "payment": { "method_id": method_id }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create order failed: {body}");
        body["data"].clone()
    }

    pub async fn set_order_status(&self, order_id: i32, status: &str) -> (StatusCode, Value) {
        self.put(
            &format!("/api/v1/orders/{order_id}/status"),
            As::Admin,
            json!({ "status": status }),
        )
        .await
    }

    pub async fn set_shipping_status(&self, order_id: i32, status: &str) -> (StatusCode, Value) {
        self.put(
            &format!("/api/v1/orders/{order_id}/shipping-status"),
            As::Admin,
            json!({ "shipping_status": status }),
        )
        .await
    }

    pub async fn payments_of(&self, order_id: i32) -> Vec<Value> {
        let (status, body) = self
            .get(&format!("/api/v1/payments/order/{order_id}"), As::Admin)
            .await;
        assert_eq!(status, StatusCode::OK, "list payments failed: {body}");
        body["data"].as_array().cloned().unwrap_or_default()
    }
}

/// Reads a decimal that may be serialized as a string or a number.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn id_of(value: &Value) -> i32 {
    value["id"].as_i64().expect("id") as i32
}
