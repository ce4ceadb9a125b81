mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp, GOLD_SHOPPER_TOKEN};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::entities::CouponKind;

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn status_endpoint_requires_no_auth() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "storefront-api");
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn cart_requires_a_bearer_token() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some("bogus-token"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn admin_endpoints_reject_shoppers() {
    let app = TestApp::new().await;
    let order_id = uuid::Uuid::new_v4();

    let response = app
        .request_as_shopper(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({ "status": "processing" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn non_positive_quantity_is_a_validation_error() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);

    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn checkout_round_trip_over_http() {
    let app = TestApp::new().await;
    let first = app.seed_product(dec!(100000), 10);
    let second = app.seed_product(dec!(50000), 10);
    app.seed_coupon(
        "SAVE10",
        CouponKind::Percentage,
        dec!(10),
        None,
        Some(dec!(20000)),
        None,
    )
    .await;

    // Build the cart: 100,000 x2 + 50,000 x1.
    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": first, "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": second, "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cart = body_json(response).await;
    assert_eq!(cart["cart"]["subtotal"], "250000");

    // The picker lists the coupon as eligible for this subtotal.
    let response = app
        .request_as_shopper(
            Method::GET,
            "/api/v1/coupons/available?order_amount=250000",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let coupons = body_json(response).await;
    assert_eq!(coupons[0]["coupon"]["code"], "SAVE10");
    assert_eq!(coupons[0]["is_eligible"], true);
    assert_eq!(coupons[0]["discount_amount"], "20000");

    // Create the order with the coupon applied.
    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "coupon_code": "SAVE10" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = body_json(response).await;
    assert_eq!(order["order"]["subtotal"], "250000");
    assert_eq!(order["order"]["discount_total"], "20000");
    assert_eq!(order["order"]["total"], "230000");
    assert_eq!(order["order"]["status"], "payment_pending");
    let order_id = order["order"]["id"].as_str().expect("order id").to_string();

    // Initiate a card payment; the secret is handed out exactly here.
    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/payments/initiate",
            Some(json!({ "order_id": order_id, "gateway": "card" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let handle = body_json(response).await;
    assert_eq!(handle["status"], "created");
    let reference = handle["external_reference"]
        .as_str()
        .expect("reference")
        .to_string();
    let secret = handle["client_secret"]
        .as_str()
        .expect("client secret")
        .to_string();

    // Confirm the intent.
    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/payments/confirm",
            Some(json!({ "reference": reference, "client_secret": secret })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let confirmation = body_json(response).await;
    assert_eq!(confirmation["payment"]["status"], "confirmed");
    assert_eq!(confirmation["order"]["status"], "new");

    // Admin walks the order forward.
    for target in ["processing", "shipped", "completed"] {
        let response = app
            .request_as_admin(
                Method::PUT,
                &format!("/api/v1/orders/{}/status", order_id),
                Some(json!({ "status": target })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], target);
    }

    // Terminal state: any further transition is 422 naming both states.
    let response = app
        .request_as_admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({ "status": "new" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    let message = body["message"].as_str().expect("message");
    assert!(message.contains("completed"));
    assert!(message.contains("new"));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn ineligible_coupon_fails_checkout_with_the_named_rule() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);
    app.seed_coupon(
        "BIGSPEND",
        CouponKind::Fixed,
        dec!(30000),
        Some(dec!(300000)),
        None,
        None,
    )
    .await;

    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_as_shopper(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "coupon_code": "BIGSPEND" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("below the coupon minimum"));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn orders_are_scoped_to_their_owner_over_http() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);

    app.request_as_shopper(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": product_id, "quantity": 1 })),
    )
    .await;
    let response = app
        .request_as_shopper(Method::POST, "/api/v1/orders", Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = body_json(response).await;
    let order_id = order["order"]["id"].as_str().expect("order id").to_string();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(GOLD_SHOPPER_TOKEN),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request_as_shopper(Method::GET, "/api/v1/orders?page=1&per_page=10", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    assert_eq!(listing["pagination"]["total"], 1);
    assert_eq!(listing["data"][0]["id"].as_str(), Some(order_id.as_str()));
}
