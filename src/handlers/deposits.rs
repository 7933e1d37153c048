use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::{
    auth::Requester, gateway::CreatePaymentResponse, services::deposits::DepositResponse,
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/deposits/{order_id}/gateway",
    summary = "Request a deposit pay link",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Pay link created", body = ApiResponse<CreatePaymentResponse>),
        (status = 400, description = "Order does not require a deposit", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or deposit method not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Deposit already paid", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "deposits"
)]
pub async fn create_deposit_payment(
    State(state): State<AppState>,
    requester: Requester,
    Path(order_id): Path<i32>,
) -> ApiResult<CreatePaymentResponse> {
    let link = state
        .services
        .deposits
        .create_deposit_payment(&requester, order_id)
        .await?;
    Ok(Json(ApiResponse::success(link)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deposits/order/{order_id}",
    summary = "Get the latest deposit of an order",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Deposit retrieved", body = ApiResponse<DepositResponse>),
        (status = 404, description = "No deposit", body = crate::errors::ErrorResponse),
    ),
    tag = "deposits"
)]
pub async fn get_deposit_by_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(order_id): Path<i32>,
) -> ApiResult<DepositResponse> {
    let deposit = state
        .services
        .deposits
        .get_deposit_by_order(&requester, order_id)
        .await?;
    Ok(Json(ApiResponse::success(deposit)))
}
