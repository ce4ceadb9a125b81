use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    clients::{CatalogClient, Identity},
    entities::{
        cart, order, order_item, payment, Cart, CartItem, Order, OrderItem,
        OrderStatus, Payment, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponService,
};

/// Order assembly and shopper-facing order operations.
///
/// `create_order` freezes the cart into an immutable order snapshot; later
/// cart edits never reach an existing order. Coupons are re-evaluated at
/// commit time against the snapshot subtotal — a previously previewed
/// discount is never trusted.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogClient>,
    coupons: Arc<CouponService>,
    event_sender: Arc<EventSender>,
}

/// Input for creating an order from the shopper's cart
#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub shipping_address: Option<serde_json::Value>,
    pub shipping_amount: Option<Decimal>,
    pub coupon_code: Option<String>,
}

/// Order with its frozen line items
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogClient>,
        coupons: Arc<CouponService>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            catalog,
            coupons,
            event_sender,
        }
    }

    /// Creates an order from the shopper's active cart.
    ///
    /// The whole operation is one transaction: stock verification for every
    /// line, commit-time coupon re-evaluation and atomic redemption, order +
    /// item insertion and cart conversion either all happen or none do.
    /// There are no partial orders.
    #[instrument(skip(self, shopper, input), fields(customer_id = %shopper.customer_id))]
    pub async fn create_order(
        &self,
        shopper: &Identity,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        let shipping_total = input.shipping_amount.unwrap_or(Decimal::ZERO);
        if shipping_total < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Shipping amount cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(shopper.customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_desc(cart::Column::CreatedAt)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ValidationError("Cart is empty".to_string()))?;

        let items = cart.find_related(CartItem).all(&txn).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        // Verify stock for every line; any shortfall rejects the whole order.
        let products = futures::future::try_join_all(
            items.iter().map(|item| self.catalog.product(item.product_id)),
        )
        .await?;
        for (item, product) in items.iter().zip(&products) {
            if product.stock < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} of {} in stock",
                    product.stock, product.name
                )));
            }
        }

        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();

        // Re-evaluate the coupon against the snapshot subtotal. The cart may
        // have changed since any earlier preview.
        let application = match &input.coupon_code {
            Some(code) => Some(
                self.coupons
                    .evaluate(code, subtotal, shopper.tier.as_deref())
                    .await?,
            ),
            None => None,
        };
        let discount_total = application
            .as_ref()
            .map(|a| a.discount_amount)
            .unwrap_or(Decimal::ZERO);

        if let Some(app) = &application {
            self.coupons.redeem(&txn, app.coupon.id).await?;
        }

        let total = subtotal - discount_total + shipping_total;

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!("ORD-{}", order_id.to_string()[..8].to_uppercase())),
            customer_id: Set(shopper.customer_id),
            status: Set(OrderStatus::PaymentPending),
            coupon_code: Set(application.as_ref().map(|a| a.coupon.code.clone())),
            subtotal: Set(subtotal),
            discount_total: Set(discount_total),
            shipping_total: Set(shipping_total),
            total: Set(total),
            currency: Set(cart.currency.clone()),
            shipping_address: Set(input.shipping_address),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        let mut order_items = Vec::with_capacity(items.len());
        for item in &items {
            let order_item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.line_total),
                created_at: Set(now),
            };
            order_items.push(order_item.insert(&txn).await?);
        }

        // Convert the cart; the shopper's next add starts a fresh one.
        let mut cart_update: cart::ActiveModel = cart.into();
        cart_update.status = Set(cart::CartStatus::Converted);
        cart_update.updated_at = Set(now);
        cart_update.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;
        if let Some(app) = &application {
            self.event_sender
                .send_or_log(Event::CouponRedeemed {
                    coupon_id: app.coupon.id,
                    order_id,
                })
                .await;
        }

        info!(
            "Created order {} for customer {}: total {}",
            order.order_number, shopper.customer_id, total
        );
        Ok(OrderWithItems {
            order,
            items: order_items,
        })
    }

    /// Fetches an order with its items. Shoppers only see their own orders;
    /// admins see all.
    #[instrument(skip(self, identity))]
    pub async fn get_order(
        &self,
        identity: &Identity,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| identity.is_admin || o.customer_id == identity.customer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Lists the shopper's orders, newest first.
    pub async fn list_orders(
        &self,
        identity: &Identity,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::CustomerId.eq(identity.customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((data, total))
    }

    /// Shopper-initiated cancellation; allowed from `new` and `processing`
    /// only.
    ///
    /// Live (`created`) payment handles are voided inside the same
    /// transaction, before the status write. Confirmed payments cannot be
    /// refunded here; their ids ride on the `OrderCancelled` event for the
    /// compensation worker.
    #[instrument(skip(self, shopper), fields(customer_id = %shopper.customer_id))]
    pub async fn cancel_order(
        &self,
        shopper: &Identity,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .filter(|o| o.customer_id == shopper.customer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if !matches!(old_status, OrderStatus::New | OrderStatus::Processing) {
            return Err(ServiceError::InvalidTransition {
                from: old_status.as_str().to_string(),
                to: OrderStatus::Cancelled.as_str().to_string(),
            });
        }

        let handles = order.find_related(Payment).all(&txn).await?;
        let mut payments_to_refund = Vec::new();
        for handle in handles {
            match handle.status {
                PaymentStatus::Created => {
                    let mut active: payment::ActiveModel = handle.into();
                    active.status = Set(PaymentStatus::Failed);
                    active.update(&txn).await?;
                }
                PaymentStatus::Confirmed => payments_to_refund.push(handle.id),
                PaymentStatus::Failed => {}
            }
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id,
                payments_to_refund,
            })
            .await;

        info!("Order {} cancelled by shopper", order_id);
        Ok(updated)
    }
}
