use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::{auth::Shopper, errors::ServiceError, services::carts::AddItemInput, AppState};

/// Creates the router for cart endpoints.
///
/// Every mutation returns the full post-mutation cart so clients replace
/// their local projection with the server's answer.
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item))
        .route("/items/:item_id", delete(remove_item))
        .route("/clear", post(clear_cart))
}

/// Get the shopper's cart with items
async fn get_cart(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(identity.customer_id).await?;
    Ok(success_response(cart))
}

/// Add a product to the cart, or increment an existing line item
async fn add_item(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .add_item(
            identity.customer_id,
            AddItemInput {
                product_id: payload.product_id,
                quantity: payload.quantity,
            },
        )
        .await?;

    Ok(success_response(cart))
}

/// Set a cart item's quantity; zero removes the item
async fn update_item(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .update_item_quantity(identity.customer_id, item_id, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove an item from the cart
async fn remove_item(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
    Path(item_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state
        .services
        .carts
        .update_item_quantity(identity.customer_id, item_id, 0)
        .await?;

    Ok(no_content_response())
}

/// Remove all items from the cart
async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Shopper(identity): Shopper,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.clear_cart(identity.customer_id).await?;
    Ok(success_response(cart))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0))]
    pub quantity: i32,
}
