use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::Shopper, entities::payment, entities::PaymentGatewayKind, errors::ServiceError,
    AppState,
};

/// Creates the router for payment endpoints.
///
/// Gateway callbacks live in [`super::payment_callbacks`]; these routes are
/// the shopper-facing surface.
pub fn payment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/initiate", post(initiate_payment))
        .route("/confirm", post(confirm_payment))
        .merge(super::payment_callbacks::callback_routes())
}

/// Request a payment handle for an order.
///
/// Repays reuse this endpoint: an order whose earlier attempt failed simply
/// initiates again. A live handle for the same gateway is returned unchanged.
async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let handle = state
        .services
        .payments
        .initiate(&identity, payload.order_id, payload.gateway)
        .await?;

    // The client secret is serialized nowhere else; the initiation response
    // is the one place the card flow hands it to the shopper.
    Ok(created_response(InitiatePaymentResponse {
        client_secret: handle.client_secret.clone(),
        payment: handle,
    }))
}

/// Confirm a card intent with its client secret (two-step card flow)
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Shopper(_identity): Shopper,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let result = state
        .services
        .payments
        .confirm(&payload.reference, &payload.client_secret)
        .await?;
    Ok(success_response(result))
}

// Request/response DTOs

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub gateway: PaymentGatewayKind,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    #[serde(flatten)]
    pub payment: payment::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1))]
    pub reference: String,
    #[validate(length(min = 1))]
    pub client_secret: String,
}
