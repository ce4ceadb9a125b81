mod common;

use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::{
    entities::{payment, CouponKind, OrderStatus, Payment, PaymentGatewayKind, PaymentStatus},
    errors::{CouponRejection, ServiceError},
    services::{carts::AddItemInput, orders::CreateOrderInput},
};
use uuid::Uuid;

async fn fill_cart(app: &TestApp, customer_id: Uuid, lines: &[(Decimal, i32, i32)]) {
    for (price, stock, quantity) in lines {
        let product_id = app.seed_product(*price, *stock);
        app.state
            .services
            .carts
            .add_item(
                customer_id,
                AddItemInput {
                    product_id,
                    quantity: *quantity,
                },
            )
            .await
            .expect("fill cart");
    }
}

fn plain_order_input() -> CreateOrderInput {
    CreateOrderInput {
        shipping_address: None,
        shipping_amount: None,
        coupon_code: None,
    }
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn order_totals_reconcile_with_the_capped_coupon() {
    let app = TestApp::new().await;
    fill_cart(
        &app,
        app.shopper.customer_id,
        &[(dec!(100000), 10, 2), (dec!(50000), 10, 1)],
    )
    .await;
    app.seed_coupon(
        "SAVE10",
        CouponKind::Percentage,
        dec!(10),
        None,
        Some(dec!(20000)),
        None,
    )
    .await;

    let order = app
        .state
        .services
        .orders
        .create_order(
            &app.shopper,
            CreateOrderInput {
                shipping_address: None,
                shipping_amount: None,
                coupon_code: Some("SAVE10".to_string()),
            },
        )
        .await
        .expect("create order");

    assert_eq!(order.order.subtotal, dec!(250000));
    assert_eq!(order.order.discount_total, dec!(20000));
    assert_eq!(order.order.total, dec!(230000));
    assert_eq!(order.order.status, OrderStatus::PaymentPending);
    assert_eq!(order.order.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(order.items.len(), 2);

    // Redemption is consumed exactly once.
    let coupon = app
        .state
        .services
        .coupons
        .get_by_code("SAVE10")
        .await
        .expect("reload coupon");
    assert_eq!(coupon.used_count, 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn order_snapshot_is_decoupled_from_later_cart_edits() {
    let app = TestApp::new().await;
    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 2)]).await;

    let order = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .expect("create order");

    // The cart was converted; the next add opens a fresh one.
    let cart = app
        .state
        .services
        .carts
        .get_cart(app.shopper.customer_id)
        .await
        .expect("fresh cart");
    assert!(cart.items.is_empty());

    fill_cart(&app, app.shopper.customer_id, &[(dec!(999999), 10, 5)]).await;

    let reloaded = app
        .state
        .services
        .orders
        .get_order(&app.shopper, order.order.id)
        .await
        .expect("reload order");
    assert_eq!(reloaded.order.subtotal, dec!(200000));
    assert_eq!(reloaded.items.len(), 1);
    assert_eq!(reloaded.items[0].unit_price, dec!(100000));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn empty_cart_cannot_become_an_order() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn coupon_is_re_evaluated_at_commit_time() {
    let app = TestApp::new().await;
    app.seed_coupon(
        "BIGSPEND",
        CouponKind::Fixed,
        dec!(30000),
        Some(dec!(300000)),
        None,
        None,
    )
    .await;

    let first = app.seed_product(dec!(200000), 10);
    let second = app.seed_product(dec!(150000), 10);
    let carts = &app.state.services.carts;
    carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id: first,
                quantity: 1,
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

    // Preview passes at 350,000.
    app.state
        .services
        .coupons
        .evaluate("BIGSPEND", cart.cart.subtotal, None)
        .await
        .expect("preview is eligible");

    // The shopper drops a line; the stale preview must not be trusted.
    let second_item = cart
        .items
        .iter()
        .find(|i| i.product_id == second)
        .expect("second line");
    carts
        .update_item_quantity(app.shopper.customer_id, second_item.id, 0)
        .await
        .expect("remove line");

    let err = app
        .state
        .services
        .orders
        .create_order(
            &app.shopper,
            CreateOrderInput {
                shipping_address: None,
                shipping_amount: None,
                coupon_code: Some("BIGSPEND".to_string()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::CouponRejected(CouponRejection::BelowMinimum { .. })
    ));

    // Nothing was committed: no redemption, cart still active.
    let coupon = app
        .state
        .services
        .coupons
        .get_by_code("BIGSPEND")
        .await
        .expect("reload coupon");
    assert_eq!(coupon.used_count, 0);
    let cart = carts
        .get_cart(app.shopper.customer_id)
        .await
        .expect("cart survives");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn limited_coupon_cannot_be_redeemed_past_its_limit() {
    let app = TestApp::new().await;
    app.seed_coupon("LASTONE", CouponKind::Fixed, dec!(10000), None, None, Some(1))
        .await;

    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 1)]).await;
    fill_cart(&app, app.gold_shopper.customer_id, &[(dec!(100000), 10, 1)]).await;

    let input = || CreateOrderInput {
        shipping_address: None,
        shipping_amount: None,
        coupon_code: Some("LASTONE".to_string()),
    };

    app.state
        .services
        .orders
        .create_order(&app.shopper, input())
        .await
        .expect("first redemption");

    let err = app
        .state
        .services
        .orders
        .create_order(&app.gold_shopper, input())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::CouponRejected(CouponRejection::UsageLimitReached)
    ));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn stock_shortfall_at_commit_rejects_the_whole_order() {
    let app = TestApp::new().await;
    let product_id = app.seed_product(dec!(100000), 5);
    app.state
        .services
        .carts
        .add_item(
            app.shopper.customer_id,
            AddItemInput {
                product_id,
                quantity: 3,
            },
        )
        .await
        .expect("add");

    // Someone else bought the stock in the meantime.
    app.catalog.set_stock(product_id, 1);

    let err = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    // No partial order: the cart is still intact and active.
    let cart = app
        .state
        .services
        .carts
        .get_cart(app.shopper.customer_id)
        .await
        .expect("cart survives");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn admin_transitions_follow_the_table() {
    let app = TestApp::new().await;
    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 1)]).await;
    let order = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .expect("create order");
    let order_id = order.order.id;
    let status_service = &app.state.services.order_status;

    for target in [
        OrderStatus::New,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Completed,
    ] {
        let updated = status_service
            .update_status(order_id, target)
            .await
            .expect("listed transition succeeds");
        assert_eq!(updated.status, target);
    }

    // Completed is terminal.
    let err = status_service
        .update_status(order_id, OrderStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn illegal_transition_is_rejected_and_leaves_status_unchanged() {
    let app = TestApp::new().await;
    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 1)]).await;
    let order = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .expect("create order");
    let order_id = order.order.id;
    let status_service = &app.state.services.order_status;

    for target in [OrderStatus::New, OrderStatus::Processing, OrderStatus::Shipped] {
        status_service
            .update_status(order_id, target)
            .await
            .expect("walk to shipped");
    }

    let err = status_service
        .update_status(order_id, OrderStatus::New)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidTransition { from, to } => {
            assert_eq!(from, "shipped");
            assert_eq!(to, "new");
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }

    let status = status_service.get_status(order_id).await.expect("status");
    assert_eq!(status, OrderStatus::Shipped);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn shopper_cancellation_voids_live_payment_handles() {
    let app = TestApp::new().await;
    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 1)]).await;
    let order = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .expect("create order");
    let order_id = order.order.id;

    let handle = app
        .state
        .services
        .payments
        .initiate(&app.shopper, order_id, PaymentGatewayKind::Card)
        .await
        .expect("initiate");

    // Cancellation is a shopper right from `new`, not from `payment_pending`.
    let err = app
        .state
        .services
        .orders
        .cancel_order(&app.shopper, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));

    app.state
        .services
        .order_status
        .update_status(order_id, OrderStatus::New)
        .await
        .expect("admin confirms the order");

    let cancelled = app
        .state
        .services
        .orders
        .cancel_order(&app.shopper, order_id)
        .await
        .expect("cancel from new");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let stored = Payment::find()
        .filter(payment::Column::Id.eq(handle.id))
        .one(&*app.state.db)
        .await
        .expect("query payment")
        .expect("payment exists");
    assert_eq!(stored.status, PaymentStatus::Failed);
}

#[tokio::test]
#[cfg_attr(not(feature = "mock-tests"), ignore)]
async fn shoppers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    fill_cart(&app, app.shopper.customer_id, &[(dec!(100000), 10, 1)]).await;
    let order = app
        .state
        .services
        .orders
        .create_order(&app.shopper, plain_order_input())
        .await
        .expect("create order");

    let err = app
        .state
        .services
        .orders
        .get_order(&app.gold_shopper, order.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // Admins see all orders.
    app.state
        .services
        .orders
        .get_order(&app.admin, order.order.id)
        .await
        .expect("admin access");
}
