//! Payment gateway client.
//!
//! Outbound: signed create-payment requests returning pay links.
//! Inbound: signature verification of asynchronous callbacks.

pub mod purpose;
pub mod signature;

pub use purpose::{gateway_order_id, parse_gateway_order_id, PaymentPurpose};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use signature::{callback_raw_string, CreateSignatureFields};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

/// Internal request for a payment link.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub order_id: i32,
    /// Whole currency units
    pub amount: i64,
    pub order_info: Option<String>,
    pub purpose: PaymentPurpose,
}

/// Payment link handed back to the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentResponse {
    pub pay_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub deeplink: Option<String>,
    /// Internal order id
    pub order_id: String,
    pub amount: i64,
    pub message: String,
    pub request_id: String,
    pub gateway_order_id: String,
}

/// Callback body posted by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCallback {
    pub partner_code: Option<String>,
    #[serde(default)]
    pub order_id: String,
    pub request_id: Option<String>,
    pub amount: Option<i64>,
    pub order_info: Option<String>,
    pub order_type: Option<String>,
    pub trans_id: Option<i64>,
    pub result_code: Option<i32>,
    pub message: Option<String>,
    pub pay_type: Option<String>,
    pub response_time: Option<i64>,
    pub extra_data: Option<String>,
    pub signature: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == Some(0)
    }

    pub fn purpose(&self) -> PaymentPurpose {
        PaymentPurpose::from_extra_data(self.extra_data.as_deref())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests a payment link. Never retried.
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, ServiceError>;

    /// Whether the callback carries a valid signature.
    fn verify_callback(&self, callback: &GatewayCallback) -> bool;
}

fn default_order_info(order_id: i32) -> String {
    format!("Payment for order #{}", order_id)
}

fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateRequest<'a> {
    partner_code: &'a str,
    partner_name: &'a str,
    store_id: &'a str,
    request_id: &'a str,
    amount: i64,
    order_id: &'a str,
    order_info: &'a str,
    redirect_url: &'a str,
    ipn_url: &'a str,
    request_type: &'a str,
    extra_data: &'a str,
    auto_capture: bool,
    lang: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    result_code: Option<i32>,
    message: Option<String>,
    pay_url: Option<String>,
    deeplink: Option<String>,
    qr_code_url: Option<String>,
}

/// HTTP client for the MoMo wallet gateway.
pub struct MomoGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl MomoGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn gateway_failure(message: String) -> ServiceError {
        counter!("plantshop_gateway.create.failed", 1);
        error!("{}", message);
        ServiceError::GatewayError(message)
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    #[instrument(skip(self), fields(order_id = request.order_id, purpose = %request.purpose))]
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let gateway_order_id = gateway_order_id(request.purpose, request.order_id, epoch_millis());
        let order_info = request
            .order_info
            .clone()
            .filter(|info| !info.trim().is_empty())
            .unwrap_or_else(|| default_order_info(request.order_id));
        let extra_data = request.purpose.extra_data();

        let raw = CreateSignatureFields {
            access_key: &self.config.access_key,
            amount: request.amount,
            extra_data: &extra_data,
            ipn_url: &self.config.ipn_url,
            order_id: &gateway_order_id,
            order_info: &order_info,
            partner_code: &self.config.partner_code,
            redirect_url: &self.config.redirect_url,
            request_id: &request_id,
            request_type: &self.config.request_type,
        }
        .raw_string();
        debug!(raw = %raw, "signing gateway request");
        let signature = signature::sign(&self.config.secret_key, &raw)?;

        let body = MomoCreateRequest {
            partner_code: &self.config.partner_code,
            partner_name: &self.config.partner_name,
            store_id: &self.config.store_id,
            request_id: &request_id,
            amount: request.amount,
            order_id: &gateway_order_id,
            order_info: &order_info,
            redirect_url: &self.config.redirect_url,
            ipn_url: &self.config.ipn_url,
            request_type: &self.config.request_type,
            extra_data: &extra_data,
            auto_capture: true,
            lang: &self.config.lang,
            signature,
        };

        info!(
            request_id = %request_id,
            gateway_order_id = %gateway_order_id,
            amount = request.amount,
            "calling payment gateway"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::gateway_failure(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::gateway_failure(format!(
                "gateway responded with HTTP {}",
                status
            )));
        }

        let parsed: MomoCreateResponse = response
            .json()
            .await
            .map_err(|e| Self::gateway_failure(format!("undecodable gateway response: {}", e)))?;

        match parsed.result_code {
            Some(0) => {}
            code => {
                return Err(Self::gateway_failure(format!(
                    "gateway rejected payment: resultCode={:?} message={}",
                    code,
                    parsed.message.unwrap_or_default()
                )));
            }
        }

        Ok(CreatePaymentResponse {
            pay_url: parsed.pay_url,
            qr_code_url: parsed.qr_code_url,
            deeplink: parsed.deeplink,
            order_id: request.order_id.to_string(),
            amount: request.amount,
            message: parsed
                .message
                .unwrap_or_else(|| "Payment link created".to_string()),
            request_id,
            gateway_order_id,
        })
    }

    fn verify_callback(&self, callback: &GatewayCallback) -> bool {
        let Some(signature) = callback.signature.as_deref() else {
            warn!(order_id = %callback.order_id, "callback without signature");
            return false;
        };
        let raw = callback_raw_string(&self.config.access_key, callback);
        signature::verify(&self.config.secret_key, &raw, signature)
    }
}

/// Offline gateway for demos and local development.
pub struct MockGateway {
    return_base: String,
}

impl MockGateway {
    pub fn new(return_base: impl Into<String>) -> Self {
        Self {
            return_base: return_base.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CreatePaymentResponse, ServiceError> {
        info!(order_id = request.order_id, amount = request.amount, "mock gateway payment");

        let gateway_order_id = gateway_order_id(request.purpose, request.order_id, epoch_millis());
        let order_id = request.order_id.to_string();
        let amount = request.amount.to_string();

        let pay_url = Url::parse_with_params(
            &self.return_base,
            &[
                ("orderId", order_id.as_str()),
                ("resultCode", "0"),
                ("message", "Mock payment succeeded"),
            ],
        )
        .map_err(|e| ServiceError::InternalError(format!("invalid mock return url: {}", e)))?;

        let qr_data = format!("MOCK_PAYMENT_ORDER_{}_AMOUNT_{}", order_id, amount);
        let qr_code_url = Url::parse_with_params(
            "https://api.qrserver.com/v1/create-qr-code/",
            &[("size", "300x300"), ("data", qr_data.as_str())],
        )
        .map_err(|e| ServiceError::InternalError(format!("invalid mock qr url: {}", e)))?;

        Ok(CreatePaymentResponse {
            pay_url: Some(pay_url.to_string()),
            qr_code_url: Some(qr_code_url.to_string()),
            deeplink: Some(format!("momo://mock?orderId={}", order_id)),
            order_id,
            amount: request.amount,
            message: "Payment link created (mock mode)".to_string(),
            request_id: Uuid::new_v4().to_string(),
            gateway_order_id,
        })
    }

    fn verify_callback(&self, _callback: &GatewayCallback) -> bool {
        debug!("mock gateway accepts every callback signature");
        true
    }
}

/// Picks the real or mock gateway from configuration.
pub fn build_gateway(
    config: &GatewayConfig,
    mock_return_base: &str,
) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
    if config.mock_mode {
        warn!("payment gateway running in mock mode");
        Ok(Arc::new(MockGateway::new(mock_return_base)))
    } else {
        Ok(Arc::new(MomoGateway::new(config.clone())?))
    }
}
