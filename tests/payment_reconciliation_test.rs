mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{decimal, id_of, As, TestApp, COD_METHOD_ID, MOMO_METHOD_ID};
use plantshop_orders::{
    config::GatewayConfig,
    entities::deposit,
    gateway::{
        signature::{callback_raw_string, sign},
        GatewayCallback, MomoGateway,
    },
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

const CALLBACK: &str = "/api/v1/payments/gateway/callback";

fn callback(order_id: &str, purpose: &str, result_code: i32, trans_id: i64, amount: i64) -> Value {
    json!({
        "partnerCode": "MOMOTEST",
        "orderId": order_id,
        "requestId": "req-1",
        "amount": amount,
        "orderInfo": "Payment",
        "orderType": "momo_wallet",
        "transId": trans_id,
        "resultCode": result_code,
        "message": if result_code == 0 { "Successful." } else { "Declined." },
        "payType": "qr",
        "responseTime": 1_700_000_000_000_i64,
        "extraData": format!("purpose={purpose}"),
        "signature": "unchecked"
    })
}

async fn deposit_rows(app: &TestApp, order_id: i32) -> u64 {
    deposit::Entity::find()
        .filter(deposit::Column::OrderId.eq(order_id))
        .count(&*app.db)
        .await
        .expect("count deposits")
}

#[tokio::test]
async fn large_orders_get_a_half_deposit_link() {
    let app = TestApp::new().await;
    let monstera = app.seed_product("Monstera", 100_000, 20).await;

    let order = app.place_order(monstera, 12, MOMO_METHOD_ID).await;
    let order_id = id_of(&order);

    assert_eq!(order["deposit_required"], true);
    assert_eq!(decimal(&order["final_total"]), dec!(1200000));
    let link = &order["deposit_payment"];
    assert_eq!(link["amount"], 600000);
    assert!(link["gateway_order_id"]
        .as_str()
        .unwrap()
        .starts_with(&format!("DEPOSIT_{order_id}_")));

    let (status, body) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(decimal(&body["data"]["amount"]), dec!(600000));
    assert_eq!(body["data"]["paid"], false);
    assert_eq!(body["data"]["method_name"], "momo");
}

#[tokio::test]
async fn small_orders_have_no_deposit() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order = app.place_order(fern, 9, COD_METHOD_ID).await;
    let order_id = id_of(&order);
    assert_eq!(order["deposit_required"], false);

    let (status, _) = app
        .post(
            &format!("/api/v1/deposits/{order_id}/gateway"),
            As::Customer,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ten_units_is_enough_to_require_a_deposit() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order = app.place_order(fern, 10, COD_METHOD_ID).await;
    let order_id = id_of(&order);

    assert_eq!(order["deposit_required"], true);
    assert_eq!(order["deposit_payment"]["amount"], 500000);

    let (status, body) = app
        .post(
            &format!("/api/v1/deposits/{order_id}/gateway"),
            As::Customer,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(deposit_rows(&app, order_id).await, 1);

    let (status, body) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["amount"]), dec!(500000));
}

#[tokio::test]
async fn deposit_callback_settles_once() {
    let app = TestApp::new().await;
    let monstera = app.seed_product("Monstera", 100_000, 20).await;
    let order = app.place_order(monstera, 12, MOMO_METHOD_ID).await;
    let order_id = id_of(&order);
    let gateway_order_id = order["deposit_payment"]["gateway_order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let body = callback(&gateway_order_id, "DEPOSIT", 0, 999, 600_000);
    let (status, ack) = app.post(CALLBACK, As::Anonymous, body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "success");

    let (_, deposit) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(deposit["data"]["paid"], true);
    assert_eq!(deposit["data"]["gateway_trans_id"], "999");
    assert!(deposit["data"]["paid_at"].is_string());

    let (status, ack) = app.post(CALLBACK, As::Anonymous, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "success");
    assert_eq!(deposit_rows(&app, order_id).await, 1);

    let (status, _) = app
        .post(
            &format!("/api/v1/deposits/{order_id}/gateway"),
            As::Customer,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn failed_deposit_attempt_leaves_it_unpaid() {
    let app = TestApp::new().await;
    let monstera = app.seed_product("Monstera", 100_000, 20).await;
    let order_id = id_of(&app.place_order(monstera, 12, MOMO_METHOD_ID).await);

    let (status, _) = app
        .post(
            CALLBACK,
            As::Anonymous,
            callback(&format!("DEPOSIT_{order_id}_1"), "DEPOSIT", 1006, 0, 600_000),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, deposit) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(deposit["data"]["paid"], false);

    // A fresh link reuses the unpaid row.
    let (status, link) = app
        .post(
            &format!("/api/v1/deposits/{order_id}/gateway"),
            As::Customer,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{link}");
    assert_eq!(deposit_rows(&app, order_id).await, 1);
}

#[tokio::test]
async fn successful_order_payment_confirms_the_order() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 2, MOMO_METHOD_ID).await);

    let (status, link) = app
        .post(
            "/api/v1/payments/gateway/create",
            As::Customer,
            json!({ "order_id": order_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{link}");
    assert_eq!(link["data"]["amount"], 200000);
    let gateway_order_id = link["data"]["gateway_order_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            CALLBACK,
            As::Anonymous,
            callback(&gateway_order_id, "ORDER_PAYMENT", 0, 1234, 200_000),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = app
        .get(&format!("/api/v1/orders/{order_id}"), As::Customer)
        .await;
    assert_eq!(order["data"]["status"], "CONFIRMED");
    let payments = app.payments_of(order_id).await;
    assert!(payments.iter().all(|p| p["status"] == "SUCCESS"));
    assert_eq!(payments[0]["gateway_order_id"], gateway_order_id.as_str());
}

#[tokio::test]
async fn late_failure_does_not_undo_a_payment() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, MOMO_METHOD_ID).await);
    let gateway_order_id = format!("ORDER_{order_id}_1700000000000");

    app.post(
        CALLBACK,
        As::Anonymous,
        callback(&gateway_order_id, "ORDER_PAYMENT", 0, 55, 100_000),
    )
    .await;
    let (status, _) = app
        .post(
            CALLBACK,
            As::Anonymous,
            callback(&gateway_order_id, "ORDER_PAYMENT", 1006, 56, 100_000),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert!(app
        .payments_of(order_id)
        .await
        .iter()
        .all(|p| p["status"] == "SUCCESS"));
}

#[tokio::test]
async fn failed_order_payment_marks_payments_failed() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, MOMO_METHOD_ID).await);

    app.post(
        CALLBACK,
        As::Anonymous,
        callback(&format!("ORDER_{order_id}_1"), "ORDER_PAYMENT", 1006, 0, 100_000),
    )
    .await;

    let (_, order) = app
        .get(&format!("/api/v1/orders/{order_id}"), As::Customer)
        .await;
    assert_eq!(order["data"]["status"], "PENDING_CONFIRMATION");
    assert_eq!(app.payments_of(order_id).await[0]["status"], "FAILED");
}

#[tokio::test]
async fn payment_for_a_cancelled_order_is_recorded_without_reviving_it() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, MOMO_METHOD_ID).await);
    app.set_order_status(order_id, "CANCELLED").await;

    let (status, _) = app
        .post(
            CALLBACK,
            As::Anonymous,
            callback(&format!("ORDER_{order_id}_1"), "ORDER_PAYMENT", 0, 77, 100_000),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = app
        .get(&format!("/api/v1/orders/{order_id}"), As::Customer)
        .await;
    assert_eq!(order["data"]["status"], "CANCELLED");
    assert_eq!(app.payments_of(order_id).await[0]["status"], "SUCCESS");
}

#[tokio::test]
async fn callbacks_for_unknown_orders_are_acknowledged() {
    let app = TestApp::new().await;

    for order_id in ["ORDER_424242_1", "not-an-order", ""] {
        let (status, ack) = app
            .post(
                CALLBACK,
                As::Anonymous,
                callback(order_id, "ORDER_PAYMENT", 0, 1, 1000),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "success");
    }
}

fn signing_gateway() -> GatewayConfig {
    GatewayConfig {
        partner_code: "MOMOTEST".into(),
        access_key: "access".into(),
        secret_key: "secret".into(),
        endpoint: "http://127.0.0.1:9/v2/gateway/api/create".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn tampered_callbacks_are_rejected() {
    let gateway = MomoGateway::new(signing_gateway()).unwrap();
    let app = TestApp::with_gateway(Arc::new(gateway)).await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, MOMO_METHOD_ID).await);

    let body = callback(&format!("ORDER_{order_id}_1"), "ORDER_PAYMENT", 0, 9, 100_000);
    let (status, ack) = app.post(CALLBACK, As::Anonymous, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ack["status"], "invalid_signature");
    assert_eq!(app.payments_of(order_id).await[0]["status"], "PROCESSING");
}

#[tokio::test]
async fn signed_callbacks_are_applied() {
    let config = signing_gateway();
    let app = TestApp::with_gateway(Arc::new(MomoGateway::new(config.clone()).unwrap())).await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, MOMO_METHOD_ID).await);

    let mut parsed: GatewayCallback = serde_json::from_value(callback(
        &format!("ORDER_{order_id}_1"),
        "ORDER_PAYMENT",
        0,
        9,
        100_000,
    ))
    .unwrap();
    let raw = callback_raw_string(&config.access_key, &parsed);
    parsed.signature = Some(sign(&config.secret_key, &raw).unwrap());

    let (status, _) = app
        .post(CALLBACK, As::Anonymous, serde_json::to_value(&parsed).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = app
        .get(&format!("/api/v1/orders/{order_id}"), As::Customer)
        .await;
    assert_eq!(order["data"]["status"], "CONFIRMED");
}

#[tokio::test]
async fn orders_survive_an_unavailable_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let config = GatewayConfig {
        endpoint: format!("{}/v2/gateway/api/create", server.uri()),
        ..signing_gateway()
    };
    let app = TestApp::with_gateway(Arc::new(MomoGateway::new(config).unwrap())).await;
    let monstera = app.seed_product("Monstera", 100_000, 20).await;

    let order = app.place_order(monstera, 12, MOMO_METHOD_ID).await;
    let order_id = id_of(&order);
    assert_eq!(order["deposit_required"], true);
    assert!(order.get("deposit_payment").is_none());

    let (status, deposit) = app
        .get(&format!("/api/v1/deposits/order/{order_id}"), As::Customer)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deposit["data"]["paid"], false);

    let (status, _) = app
        .post(
            &format!("/api/v1/deposits/{order_id}/gateway"),
            As::Customer,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn shopper_is_redirected_back_to_the_storefront() {
    let app = TestApp::new().await;

    let response = app
        .send(
            Request::builder()
                .method(Method::GET)
                .uri("/api/v1/payments/gateway/return?orderId=DEPOSIT_5_1&resultCode=0&message=ok")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("paymentResult=true"));
    assert!(location.contains("orderId=DEPOSIT_5_1"));
    assert!(location.contains("resultCode=0"));
}

#[tokio::test]
async fn manual_payment_updates_respect_the_order_state() {
    let app = TestApp::new().await;
    let fern = app.seed_product("Boston fern", 100_000, 20).await;
    let order_id = id_of(&app.place_order(fern, 1, COD_METHOD_ID).await);
    let payment_id = id_of(&app.payments_of(order_id).await[0]);

    let uri = format!("/api/v1/payments/{payment_id}/status");
    let (status, _) = app
        .put(&uri, As::Customer, json!({ "status": "SUCCESS" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .put(&uri, As::Admin, json!({ "status": "SUCCESS" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.set_order_status(order_id, "CONFIRMED").await;
    let (status, body) = app
        .put(&uri, As::Admin, json!({ "status": "SUCCESS" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "SUCCESS");
}

#[tokio::test]
async fn payment_methods_are_listed() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/v1/payment-methods", As::Customer).await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["method_name"].as_str())
        .collect();
    assert!(names.contains(&"momo"));
    assert!(names.contains(&"COD"));
}
