use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    auth::Requester,
    errors::ServiceError,
    services::orders::{
        CreateOrderRequest, OrderResponse, UpdateOrderStatusRequest, UpdateShippingStatusRequest,
    },
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Place an order from the requester's selected items. Prices come from the catalog.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse),
        (status = 403, description = "Only customers can place orders", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or discount not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    requester: Requester,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let order = state.services.orders.create_order(&requester, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List all orders",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state.services.orders.get_all_orders(&requester).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order_by_id(&requester, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/user/{user_id}",
    summary = "List a user's orders",
    params(("user_id" = i32, Path, description = "Owning user id")),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "User has no orders", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_orders_by_user(
    State(state): State<AppState>,
    requester: Requester,
    Path(user_id): Path<i32>,
) -> ApiResult<Vec<OrderResponse>> {
    let orders = state
        .services
        .orders
        .get_orders_by_user(&requester, user_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    description = "Cancelling a pending order returns its stock and fails its payments.",
    params(("id" = i32, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal status combination", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .update_order_status(&requester, id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/shipping-status",
    summary = "Update shipping status",
    description = "Delivery settles cash-on-delivery payments.",
    params(("id" = i32, Path, description = "Order id")),
    request_body = UpdateShippingStatusRequest,
    responses(
        (status = 200, description = "Shipping status updated", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal status combination", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_shipping_status(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
    Json(request): Json<UpdateShippingStatusRequest>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .update_shipping_status(&requester, id, request.shipping_status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete order",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order(&requester, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
