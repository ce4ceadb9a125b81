use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::{Admin, Shopper},
    errors::ServiceError,
    services::coupons::CreateCouponInput,
    AppState,
};

/// Creates the router for coupon endpoints
pub fn coupon_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/evaluate", post(evaluate_coupon))
        .route("/available", get(list_available))
        .route("/", post(create_coupon))
}

/// Evaluate a coupon code against an order amount.
///
/// This is the preview path; the order assembler re-runs the same evaluation
/// at commit time, so a stale preview can never leak into an order.
async fn evaluate_coupon(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Json(payload): Json<EvaluateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let application = state
        .services
        .coupons
        .evaluate(&payload.code, payload.order_amount, identity.tier.as_deref())
        .await?;

    Ok(success_response(application))
}

/// List active coupons annotated with eligibility for the given order amount
async fn list_available(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Query(params): Query<AvailableCouponsQuery>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupons = state
        .services
        .coupons
        .list_available(params.order_amount, identity.tier.as_deref())
        .await?;

    Ok(success_response(coupons))
}

/// Create a coupon (admin)
async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Admin(_admin): Admin,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupon = state.services.coupons.create_coupon(payload).await?;
    Ok(created_response(coupon))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
    pub order_amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct AvailableCouponsQuery {
    pub order_amount: Decimal,
}
