//! Payment gateway integrations.
//!
//! Three gateways hide behind one trait: VNPay and MoMo are redirect flows
//! (the handle carries a URL the shopper must follow and the gateway calls
//! back out-of-band), the card flow issues a client-confirmable intent.
//! The payment service only ever sees the normalized handle shape.

pub mod card;
pub mod momo;
pub mod vnpay;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::PaymentGatewayKind;
use crate::errors::ServiceError;

pub use card::CardGateway;
pub use momo::MomoGateway;
pub use vnpay::VnpayGateway;

/// Request to open a payment attempt with a gateway
#[derive(Debug)]
pub struct CreateHandleRequest<'a> {
    pub order_id: Uuid,
    pub order_number: &'a str,
    pub amount: Decimal,
    pub currency: &'a str,
}

/// Gateway-issued handle, normalized across all gateways
#[derive(Debug)]
pub struct GatewayHandle {
    pub external_reference: String,
    /// Redirect flows: where to send the shopper.
    pub redirect_url: Option<String>,
    /// Card flow: the secret the client confirms with.
    pub client_secret: Option<String>,
}

/// Verified content of an inbound gateway callback
#[derive(Debug)]
pub struct CallbackOutcome {
    pub external_reference: String,
    pub success: bool,
    /// Raw gateway result code, for logs and failure messages.
    pub gateway_code: String,
    /// Amount the gateway reports having collected, when it reports one.
    pub amount: Option<Decimal>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> PaymentGatewayKind;

    /// Opens a payment attempt for the given order and amount.
    async fn create_handle(
        &self,
        request: CreateHandleRequest<'_>,
    ) -> Result<GatewayHandle, ServiceError>;

    /// Verifies an inbound callback's signature and extracts its outcome.
    /// A bad signature is `Unauthorized`; the callback is never trusted
    /// before this check passes.
    fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError>;
}

/// All configured gateways, keyed by kind.
pub struct GatewayRegistry {
    vnpay: VnpayGateway,
    momo: MomoGateway,
    card: CardGateway,
}

impl GatewayRegistry {
    pub fn new(cfg: &AppConfig, http: reqwest::Client) -> Self {
        Self {
            vnpay: VnpayGateway::new(cfg.vnpay.clone()),
            momo: MomoGateway::new(cfg.momo.clone(), http),
            card: CardGateway::new(),
        }
    }

    pub fn get(&self, kind: PaymentGatewayKind) -> &dyn PaymentGateway {
        match kind {
            PaymentGatewayKind::Vnpay => &self.vnpay,
            PaymentGatewayKind::Momo => &self.momo,
            PaymentGatewayKind::Card => &self.card,
        }
    }
}

/// Constant-time string comparison for signature checks.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
