use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use super::{constant_time_eq, CallbackOutcome, CreateHandleRequest, GatewayHandle, PaymentGateway};
use crate::config::MomoConfig;
use crate::entities::PaymentGatewayKind;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// MoMo wallet gateway (captureWallet flow).
///
/// Creating a handle is an HTTP call to MoMo's create endpoint; the request
/// and the IPN callback are both signed with HMAC-SHA256 over a canonical
/// `key=value&...` string in MoMo's fixed field order. Amounts are whole VND.
pub struct MomoGateway {
    cfg: MomoConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateRequest {
    partner_code: String,
    access_key: String,
    request_id: String,
    amount: i64,
    order_id: String,
    order_info: String,
    redirect_url: String,
    ipn_url: String,
    extra_data: String,
    request_type: String,
    signature: String,
    lang: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    result_code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pay_url: Option<String>,
}

impl MomoGateway {
    pub fn new(cfg: MomoConfig, http: reqwest::Client) -> Self {
        Self { cfg, http }
    }

    fn hmac(&self, raw: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.cfg.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(raw.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Canonical string signed on the create request, in MoMo's fixed
    /// alphabetical field order.
    #[allow(clippy::too_many_arguments)]
    fn create_signature(
        &self,
        amount: i64,
        order_id: &str,
        order_info: &str,
        request_id: &str,
        request_type: &str,
    ) -> String {
        let raw = format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            self.cfg.access_key,
            amount,
            "",
            self.cfg.ipn_url,
            order_id,
            order_info,
            self.cfg.partner_code,
            self.cfg.redirect_url,
            request_id,
            request_type,
        );
        self.hmac(&raw)
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Momo
    }

    async fn create_handle(
        &self,
        request: CreateHandleRequest<'_>,
    ) -> Result<GatewayHandle, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        // Unique per attempt; MoMo rejects a reused orderId.
        let order_ref = format!("{}-{}", request.order_number, &request_id[..8]);
        let order_info = format!("Payment for order {}", request.order_number);
        let amount = request.amount.trunc().to_i64().ok_or_else(|| {
            ServiceError::ValidationError("Order amount is out of range".to_string())
        })?;
        let request_type = "captureWallet";

        let signature =
            self.create_signature(amount, &order_ref, &order_info, &request_id, request_type);

        let body = MomoCreateRequest {
            partner_code: self.cfg.partner_code.clone(),
            access_key: self.cfg.access_key.clone(),
            request_id,
            amount,
            order_id: order_ref.clone(),
            order_info,
            redirect_url: self.cfg.redirect_url.clone(),
            ipn_url: self.cfg.ipn_url.clone(),
            extra_data: String::new(),
            request_type: request_type.to_string(),
            signature,
            lang: "en".to_string(),
        };

        let response = self
            .http
            .post(&self.cfg.create_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("MoMo gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "MoMo gateway returned {}",
                response.status()
            )));
        }

        let payload: MomoCreateResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "MoMo gateway returned an unexpected payload: {}",
                e
            ))
        })?;

        if payload.result_code != 0 {
            return Err(ServiceError::PaymentFailed(format!(
                "MoMo declined the payment request: {}",
                payload.message.unwrap_or_else(|| "no reason given".to_string())
            )));
        }

        let redirect_url = payload.pay_url.ok_or_else(|| {
            ServiceError::ExternalServiceError(
                "MoMo response is missing the payment URL".to_string(),
            )
        })?;

        Ok(GatewayHandle {
            external_reference: order_ref,
            redirect_url: Some(redirect_url),
            client_secret: None,
        })
    }

    fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let received = params
            .get("signature")
            .ok_or_else(|| ServiceError::Unauthorized("missing gateway signature".to_string()))?;

        let field = |name: &str| params.get(name).map(String::as_str).unwrap_or("");
        let raw = format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.cfg.access_key,
            field("amount"),
            field("extraData"),
            field("message"),
            field("orderId"),
            field("orderInfo"),
            field("orderType"),
            field("partnerCode"),
            field("payType"),
            field("requestId"),
            field("responseTime"),
            field("resultCode"),
            field("transId"),
        );

        let expected = self.hmac(&raw);
        if !constant_time_eq(&expected, &received.to_lowercase()) {
            warn!("MoMo IPN signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid gateway signature".to_string(),
            ));
        }

        let external_reference = params.get("orderId").cloned().ok_or_else(|| {
            ServiceError::ValidationError("callback is missing orderId".to_string())
        })?;
        let result_code = field("resultCode").to_string();
        let amount = params.get("amount").and_then(|v| v.parse::<Decimal>().ok());

        Ok(CallbackOutcome {
            external_reference,
            success: result_code == "0",
            gateway_code: result_code,
            amount,
        })
    }
}
