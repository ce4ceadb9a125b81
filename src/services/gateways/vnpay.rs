use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::{constant_time_eq, CallbackOutcome, CreateHandleRequest, GatewayHandle, PaymentGateway};
use crate::config::VnpayConfig;
use crate::entities::PaymentGatewayKind;
use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

const VNP_VERSION: &str = "2.1.0";

/// VNPay redirect gateway.
///
/// The handle is a payment URL signed with HMAC-SHA512 over the sorted,
/// url-encoded parameter string; VNPay reports the outcome on the return
/// redirect and the IPN callback, both carrying the same signature scheme.
/// Amounts are sent in minor units (x100).
pub struct VnpayGateway {
    cfg: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(cfg: VnpayConfig) -> Self {
        Self { cfg }
    }

    /// Sorted url-encoded query over which VNPay signatures are computed.
    fn hash_data(params: &BTreeMap<String, String>) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let mut mac = HmacSha512::new_from_slice(self.cfg.hash_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(Self::hash_data(params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Vnpay
    }

    async fn create_handle(
        &self,
        request: CreateHandleRequest<'_>,
    ) -> Result<GatewayHandle, ServiceError> {
        // VNPay requires a unique transaction reference per attempt, so the
        // order number alone is not enough across repays.
        let txn_ref = format!(
            "{}-{}",
            request.order_number,
            &uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase()
        );

        let minor_units = (request.amount * Decimal::from(100))
            .trunc()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::ValidationError("Order amount is out of range".to_string())
            })?;

        let mut params = BTreeMap::new();
        params.insert("vnp_Version".to_string(), VNP_VERSION.to_string());
        params.insert("vnp_Command".to_string(), "pay".to_string());
        params.insert("vnp_TmnCode".to_string(), self.cfg.tmn_code.clone());
        params.insert("vnp_Amount".to_string(), minor_units.to_string());
        params.insert("vnp_CurrCode".to_string(), request.currency.to_string());
        params.insert("vnp_TxnRef".to_string(), txn_ref.clone());
        params.insert(
            "vnp_OrderInfo".to_string(),
            format!("Payment for order {}", request.order_number),
        );
        params.insert("vnp_ReturnUrl".to_string(), self.cfg.return_url.clone());
        params.insert(
            "vnp_CreateDate".to_string(),
            Utc::now().format("%Y%m%d%H%M%S").to_string(),
        );

        let signature = self.sign(&params);
        let redirect_url = format!(
            "{}?{}&vnp_SecureHash={}",
            self.cfg.payment_url,
            Self::hash_data(&params),
            signature
        );

        Ok(GatewayHandle {
            external_reference: txn_ref,
            redirect_url: Some(redirect_url),
            client_secret: None,
        })
    }

    fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let received_hash = params
            .get("vnp_SecureHash")
            .ok_or_else(|| ServiceError::Unauthorized("missing gateway signature".to_string()))?;

        // The signature covers every vnp_ parameter except the hash fields,
        // in sorted order.
        let signed: BTreeMap<String, String> = params
            .iter()
            .filter(|(k, _)| k.as_str() != "vnp_SecureHash" && k.as_str() != "vnp_SecureHashType")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let expected = self.sign(&signed);
        if !constant_time_eq(&expected, &received_hash.to_lowercase()) {
            warn!("VNPay callback signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid gateway signature".to_string(),
            ));
        }

        let external_reference = params
            .get("vnp_TxnRef")
            .cloned()
            .ok_or_else(|| {
                ServiceError::ValidationError("callback is missing vnp_TxnRef".to_string())
            })?;
        let response_code = params
            .get("vnp_ResponseCode")
            .cloned()
            .unwrap_or_else(|| "99".to_string());
        let amount = params
            .get("vnp_Amount")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|minor| Decimal::from(minor) / Decimal::from(100));

        Ok(CallbackOutcome {
            external_reference,
            success: response_code == "00",
            gateway_code: response_code,
            amount,
        })
    }
}
