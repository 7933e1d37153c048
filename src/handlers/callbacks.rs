//! Endpoints the payment gateway talks to directly. No identity headers.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;
use utoipa::{IntoParams, ToSchema};

use crate::{errors::ServiceError, gateway::GatewayCallback, AppState};

/// Acknowledgement body the gateway expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    pub status: String,
}

impl CallbackAck {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

// POST /api/v1/payments/gateway/callback
#[utoipa::path(
    post,
    path = "/api/v1/payments/gateway/callback",
    request_body = GatewayCallback,
    responses(
        (status = 200, description = "Callback processed, including duplicates", body = CallbackAck),
        (status = 400, description = "Invalid signature", body = CallbackAck),
        (status = 500, description = "Processing failed; the gateway should retry", body = CallbackAck),
    ),
    tag = "gateway"
)]
pub async fn gateway_callback(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> (StatusCode, Json<CallbackAck>) {
    match state.services.reconciliation.handle_callback(callback).await {
        Ok(outcome) => {
            debug!(?outcome, "callback acknowledged");
            (StatusCode::OK, CallbackAck::new("success"))
        }
        Err(ServiceError::InvalidSignature) => {
            (StatusCode::BAD_REQUEST, CallbackAck::new("invalid_signature"))
        }
        Err(e) => {
            error!(error = %e, "callback processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, CallbackAck::new("error"))
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(rename_all = "camelCase")]
pub struct GatewayReturnQuery {
    pub order_id: Option<String>,
    pub result_code: Option<String>,
    pub message: Option<String>,
}

/// Frontend URL the shopper is sent back to after paying.
pub fn return_redirect_url(frontend: &str, query: &GatewayReturnQuery) -> Result<Url, ServiceError> {
    let mut url = Url::parse(frontend).map_err(|e| {
        ServiceError::InternalError(format!("invalid frontend return url: {}", e))
    })?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("paymentResult", "true");
        if let Some(order_id) = &query.order_id {
            pairs.append_pair("orderId", order_id);
        }
        if let Some(result_code) = &query.result_code {
            pairs.append_pair("resultCode", result_code);
        }
        if let Some(message) = &query.message {
            pairs.append_pair("message", message);
        }
    }
    Ok(url)
}

// GET /api/v1/payments/gateway/return
#[utoipa::path(
    get,
    path = "/api/v1/payments/gateway/return",
    params(GatewayReturnQuery),
    responses(
        (status = 302, description = "Redirect to the storefront order page"),
    ),
    tag = "gateway"
)]
pub async fn gateway_return(
    State(state): State<AppState>,
    Query(query): Query<GatewayReturnQuery>,
) -> Result<Response, ServiceError> {
    if query.order_id.is_none() {
        warn!("gateway return without an order id");
    }
    let url = return_redirect_url(&state.config.frontend_return_url, &query)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_carries_encoded_result() {
        let query = GatewayReturnQuery {
            order_id: Some("42".into()),
            result_code: Some("0".into()),
            message: Some("Thành công & done".into()),
        };
        let url = return_redirect_url("http://localhost:3000/orders-page/", &query).unwrap();

        assert!(url
            .as_str()
            .starts_with("http://localhost:3000/orders-page/?paymentResult=true&orderId=42&resultCode=0&message="));
        let message = url
            .query_pairs()
            .find(|(k, _)| k == "message")
            .map(|(_, v)| v.into_owned());
        assert_eq!(message.as_deref(), Some("Thành công & done"));
    }
}
