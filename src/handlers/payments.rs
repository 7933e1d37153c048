use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    auth::Requester,
    errors::ServiceError,
    gateway::CreatePaymentResponse,
    services::payments::{
        GatewayPaymentRequest, NewPaymentRequest, PaymentMethodResponse, PaymentResponse,
        UpdatePaymentStatusRequest,
    },
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/payments/order/{order_id}",
    summary = "Record a payment for an order",
    params(("order_id" = i32, Path, description = "Order id")),
    request_body = NewPaymentRequest,
    responses(
        (status = 201, description = "Payment created", body = ApiResponse<PaymentResponse>),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order or method not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    requester: Requester,
    Path(order_id): Path<i32>,
    Json(request): Json<NewPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    let payment = state
        .services
        .payments
        .create_payment(&requester, order_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    summary = "List all payments",
    responses(
        (status = 200, description = "Payments retrieved", body = ApiResponse<Vec<PaymentResponse>>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    requester: Requester,
) -> ApiResult<Vec<PaymentResponse>> {
    let payments = state.services.payments.get_all_payments(&requester).await?;
    Ok(Json(ApiResponse::success(payments)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Get payment",
    params(("id" = i32, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment retrieved", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
) -> ApiResult<PaymentResponse> {
    let payment = state.services.payments.get_payment(&requester, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{order_id}",
    summary = "List payments of an order",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payments retrieved", body = ApiResponse<Vec<PaymentResponse>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn get_payments_by_order(
    State(state): State<AppState>,
    requester: Requester,
    Path(order_id): Path<i32>,
) -> ApiResult<Vec<PaymentResponse>> {
    let payments = state
        .services
        .payments
        .get_payments_by_order(&requester, order_id)
        .await?;
    Ok(Json(ApiResponse::success(payments)))
}

#[utoipa::path(
    put,
    path = "/api/v1/payments/{id}/status",
    summary = "Update payment status",
    params(("id" = i32, Path, description = "Payment id")),
    request_body = UpdatePaymentStatusRequest,
    responses(
        (status = 200, description = "Payment updated", body = ApiResponse<PaymentResponse>),
        (status = 403, description = "Admins only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal for the order's state", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    requester: Requester,
    Path(id): Path<i32>,
    Json(request): Json<UpdatePaymentStatusRequest>,
) -> ApiResult<PaymentResponse> {
    let payment = state
        .services
        .payments
        .update_payment_status(&requester, id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payment-methods",
    summary = "List payment methods",
    responses(
        (status = 200, description = "Methods retrieved", body = ApiResponse<Vec<PaymentMethodResponse>>),
    ),
    tag = "payments"
)]
pub async fn list_payment_methods(
    State(state): State<AppState>,
    _requester: Requester,
) -> ApiResult<Vec<PaymentMethodResponse>> {
    let methods = state.services.payments.list_payment_methods().await?;
    Ok(Json(ApiResponse::success(methods)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/gateway/create",
    summary = "Request a gateway pay link",
    request_body = GatewayPaymentRequest,
    responses(
        (status = 200, description = "Pay link created", body = ApiResponse<CreatePaymentResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_gateway_payment(
    State(state): State<AppState>,
    requester: Requester,
    Json(request): Json<GatewayPaymentRequest>,
) -> ApiResult<CreatePaymentResponse> {
    let link = state
        .services
        .payments
        .create_gateway_payment(&requester, request)
        .await?;
    Ok(Json(ApiResponse::success(link)))
}
