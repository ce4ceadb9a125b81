use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::handlers::common::{
    created_response, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::{Admin, Shopper},
    entities::{OrderStatus, PaymentGatewayKind},
    errors::ServiceError,
    handlers::payments::InitiatePaymentResponse,
    services::orders::CreateOrderInput,
    AppState,
};

/// Creates the router for order endpoints
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/repay", post(repay_order))
        .route("/:id/status", put(update_order_status))
}

/// Create an order from the shopper's cart
async fn create_order(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Json(payload): Json<CreateOrderInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(&identity, payload).await?;
    Ok(created_response(order))
}

/// List the shopper's orders, newest first
async fn list_orders(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Query(params): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(&identity, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        params.per_page,
        total,
    )))
}

/// Get an order with its items
async fn get_order(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&identity, order_id).await?;
    Ok(success_response(order))
}

/// Cancel an order (shopper). Allowed from `new` and `processing` only.
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(&identity, order_id)
        .await?;
    Ok(success_response(order))
}

/// Start a fresh payment attempt for an unpaid order.
///
/// Alias over payment initiation: the same preconditions and the same
/// one-live-handle policy apply.
async fn repay_order(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RepayRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let handle = state
        .services
        .payments
        .initiate(&identity, order_id, payload.gateway)
        .await?;
    Ok(created_response(InitiatePaymentResponse {
        client_secret: handle.client_secret.clone(),
        payment: handle,
    }))
}

/// Apply an administrative status transition.
///
/// Illegal transitions come back as 422 with both states named, never as a
/// silent clamp.
async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Admin(_admin): Admin,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .update_status(order_id, payload.status)
        .await?;
    Ok(success_response(order))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct RepayRequest {
    pub gateway: PaymentGatewayKind,
}
