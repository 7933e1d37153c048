//! Canonical raw strings and HMAC-SHA256 signing for gateway traffic.

use super::GatewayCallback;
use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fields of an outbound create-payment request that are covered by the signature.
#[derive(Debug, Clone)]
pub struct CreateSignatureFields<'a> {
    pub access_key: &'a str,
    pub amount: i64,
    pub extra_data: &'a str,
    pub ipn_url: &'a str,
    pub order_id: &'a str,
    pub order_info: &'a str,
    pub partner_code: &'a str,
    pub redirect_url: &'a str,
    pub request_id: &'a str,
    pub request_type: &'a str,
}

impl CreateSignatureFields<'_> {
    pub fn raw_string(&self) -> String {
        format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.access_key,
            self.amount,
            self.extra_data,
            self.ipn_url,
            self.order_id,
            self.order_info,
            self.partner_code,
            self.redirect_url,
            self.request_id,
            self.request_type,
        )
    }
}

fn or_empty<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Raw string the gateway signs its callbacks over. Absent fields render empty.
pub fn callback_raw_string(access_key: &str, callback: &GatewayCallback) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
        access_key,
        or_empty(&callback.amount),
        or_empty(&callback.extra_data),
        or_empty(&callback.message),
        callback.order_id,
        or_empty(&callback.order_info),
        or_empty(&callback.order_type),
        or_empty(&callback.partner_code),
        or_empty(&callback.pay_type),
        or_empty(&callback.request_id),
        or_empty(&callback.response_time),
        or_empty(&callback.result_code),
        or_empty(&callback.trans_id),
    )
}

/// Lowercase hex HMAC-SHA256 of `raw` keyed by `secret_key`.
pub fn sign(secret_key: &str, raw: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid signing key: {}", e)))?;
    mac.update(raw.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against `raw` without short-circuiting on the first mismatch.
pub fn verify(secret_key: &str, raw: &str, signature: &str) -> bool {
    match sign(secret_key, raw) {
        Ok(expected) => constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published test vector for HMAC-SHA256 (RFC 4231 case 2).
    #[test]
    fn signs_known_vector() {
        let sig = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn create_raw_string_uses_fixed_key_order() {
        let fields = CreateSignatureFields {
            access_key: "AK",
            amount: 600000,
            extra_data: "purpose=DEPOSIT",
            ipn_url: "https://shop.example/ipn",
            order_id: "DEPOSIT_12_1700000000000",
            order_info: "Deposit for order #12",
            partner_code: "PC",
            redirect_url: "https://shop.example/return",
            request_id: "req-1",
            request_type: "captureWallet",
        };
        assert_eq!(
            fields.raw_string(),
            "accessKey=AK&amount=600000&extraData=purpose=DEPOSIT&ipnUrl=https://shop.example/ipn&orderId=DEPOSIT_12_1700000000000&orderInfo=Deposit for order #12&partnerCode=PC&redirectUrl=https://shop.example/return&requestId=req-1&requestType=captureWallet"
        );
    }

    #[test]
    fn callback_raw_string_renders_missing_fields_empty() {
        let callback = GatewayCallback {
            order_id: "ORDER_3_1".into(),
            result_code: Some(0),
            trans_id: Some(999),
            ..Default::default()
        };
        assert_eq!(
            callback_raw_string("AK", &callback),
            "accessKey=AK&amount=&extraData=&message=&orderId=ORDER_3_1&orderInfo=&orderType=&partnerCode=&payType=&requestId=&responseTime=&resultCode=0&transId=999"
        );
    }

    #[test]
    fn verify_accepts_matching_and_rejects_tampered() {
        let raw = "accessKey=AK&amount=100";
        let sig = sign("secret", raw).unwrap();
        assert!(verify("secret", raw, &sig));
        assert!(verify("secret", raw, &sig.to_uppercase()));
        assert!(!verify("secret", "accessKey=AK&amount=101", &sig));
        assert!(!verify("other", raw, &sig));
        assert!(!verify("secret", raw, "deadbeef"));
    }
}
