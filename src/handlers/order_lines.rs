use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    auth::Requester,
    errors::ServiceError,
    services::{order_lines::UpdateOrderLineRequest, orders::OrderLineResponse},
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/lines",
    summary = "List order lines",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Lines retrieved", body = ApiResponse<Vec<OrderLineResponse>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "order-lines"
)]
pub async fn list_order_lines(
    State(state): State<AppState>,
    requester: Requester,
    Path(order_id): Path<i32>,
) -> ApiResult<Vec<OrderLineResponse>> {
    let lines = state
        .services
        .order_lines
        .get_order_lines(&requester, order_id)
        .await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    get,
    path = "/api/v1/order-lines/{id}",
    summary = "Get order line",
    params(("id" = i32, Path, description = "Order line id")),
    responses(
        (status = 200, description = "Line retrieved", body = ApiResponse<OrderLineResponse>),
        (status = 404, description = "Line not found", body = crate::errors::ErrorResponse),
    ),
    tag = "order-lines"
)]
pub async fn get_order_line(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
) -> ApiResult<OrderLineResponse> {
    let line = state.services.order_lines.get_order_line(&requester, id).await?;
    Ok(Json(ApiResponse::success(line)))
}

#[utoipa::path(
    put,
    path = "/api/v1/order-lines/{id}",
    summary = "Update order line",
    description = "Only while the order is PENDING_CONFIRMATION. Stock follows the quantity change.",
    params(("id" = i32, Path, description = "Order line id")),
    request_body = UpdateOrderLineRequest,
    responses(
        (status = 200, description = "Line updated", body = ApiResponse<OrderLineResponse>),
        (status = 403, description = "Not allowed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order no longer pending", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    tag = "order-lines"
)]
pub async fn update_order_line(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
    Json(request): Json<UpdateOrderLineRequest>,
) -> ApiResult<OrderLineResponse> {
    let line = state
        .services
        .order_lines
        .update_order_line(&requester, id, request)
        .await?;
    Ok(Json(ApiResponse::success(line)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/order-lines/{id}",
    summary = "Delete order line",
    params(("id" = i32, Path, description = "Order line id")),
    responses(
        (status = 204, description = "Line deleted"),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order no longer pending", body = crate::errors::ErrorResponse),
    ),
    tag = "order-lines"
)]
pub async fn delete_order_line(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .order_lines
        .delete_order_line(&requester, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
