mod common;

use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use storefront_api::{errors::ServiceError, services::carts::AddItemInput};

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn first_add_creates_the_cart_implicitly() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);

    let cart = app
        .state
        .services
        .carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .expect("add item");

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.items[0].unit_price, dec!(100000));
    assert_eq!(cart.items[0].line_total, dec!(200000));
    assert_eq!(cart.cart.subtotal, dec!(200000));
    assert_eq!(cart.cart.customer_id, app.shopper.customer_id);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn adding_the_same_product_increments_the_line() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(50000), 10);
    let carts = &app.state.services.carts;

    carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .expect("first add");
    let cart = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .expect("second add");

    assert_eq!(cart.items.len(), 1, "same product merges into one line");
    assert_eq!(cart.items[0].quantity, 3);
    assert_eq!(cart.cart.subtotal, dec!(150000));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn subtotal_sums_all_lines() {
    let app = TestApp::new().await;
    let first = app.seed_product(dec!(100000), 10);
    let second = app.seed_product(dec!(50000), 10);
    let carts = &app.state.services.carts;

    carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id: first,
                quantity: 2,
            },
        )
        .await
        .expect("add first");
    let cart = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id: second,
                quantity: 1,
            },
        )
        .await
        .expect("add second");

    assert_eq!(cart.items.len(), 2);
    assert_eq!(cart.cart.subtotal, dec!(250000));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn add_beyond_stock_is_rejected_and_cart_unchanged() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 3);
    let carts = &app.state.services.carts;

    carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .expect("within stock");

    let err = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    let cart = carts
        .get_cart(app.shopper.customer_id)
        .await
        .expect("get cart");
    assert_eq!(cart.items[0].quantity, 2, "failed add must not change state");
    assert_eq!(cart.cart.subtotal, dec!(200000));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn non_positive_quantity_removes_the_item() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);
    let carts = &app.state.services.carts;

    let cart = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .expect("add");
    let item_id = cart.items[0].id;

    let cart = carts
        .update_item_quantity(app.shopper.customer_id, item_id, 0)
        .await
        .expect("update to zero");

    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.subtotal, Decimal::ZERO);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn update_quantity_recomputes_line_and_subtotal() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(50000), 10);
    let carts = &app.state.services.carts;

    let cart = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .expect("add");
    let item_id = cart.items[0].id;

    let cart = carts
        .update_item_quantity(app.shopper.customer_id, item_id, 4)
        .await
        .expect("update");

    assert_eq!(cart.items[0].quantity, 4);
    assert_eq!(cart.items[0].line_total, dec!(200000));
    assert_eq!(cart.cart.subtotal, dec!(200000));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn items_cannot_be_edited_through_another_shoppers_cart() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);
    let carts = &app.state.services.carts;

    let cart = carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .expect("add");
    let item_id = cart.items[0].id;

    // The gold shopper has their own (empty) cart; the item is not theirs.
    carts
        .add_item(
            app.gold_shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 1,
            },
        )
        .await
        .expect("other cart");

    let err = carts
        .update_item_quantity(app.gold_shopper.customer_id, item_id, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn clear_cart_leaves_an_empty_cart() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 10);
    let carts = &app.state.services.carts;

    carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 2,
            },
        )
        .await
        .expect("add");

    let cart = carts
        .clear_cart(app.shopper.customer_id)
        .await
        .expect("clear");
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.subtotal, Decimal::ZERO);
}
