use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::collections::HashMap;

use super::{CallbackOutcome, CreateHandleRequest, GatewayHandle, PaymentGateway};
use crate::entities::PaymentGatewayKind;
use crate::errors::ServiceError;

/// Card-style payment flow.
///
/// Issues a locally-generated intent the client confirms in a second step by
/// presenting the client secret; there is no out-of-band callback.
#[derive(Default)]
pub struct CardGateway;

impl CardGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Card
    }

    async fn create_handle(
        &self,
        _request: CreateHandleRequest<'_>,
    ) -> Result<GatewayHandle, ServiceError> {
        let mut reference_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut reference_bytes);
        let external_reference = format!("pi_{}", hex::encode(reference_bytes));

        let mut secret_bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let client_secret = format!(
            "{}_secret_{}",
            external_reference,
            URL_SAFE_NO_PAD.encode(secret_bytes)
        );

        Ok(GatewayHandle {
            external_reference,
            redirect_url: None,
            client_secret: Some(client_secret),
        })
    }

    fn verify_callback(
        &self,
        _params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        Err(ServiceError::InvalidOperation(
            "Card payments are confirmed client-side, not via callback".to_string(),
        ))
    }
}
