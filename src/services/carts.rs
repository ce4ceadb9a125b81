use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    clients::CatalogClient,
    entities::{cart, cart_item, Cart, CartItem, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Server-authoritative shopping cart.
///
/// Every mutation runs in one transaction, recomputes the subtotal and
/// returns the full post-mutation cart, so clients replace their local
/// projection instead of computing deltas. Prices come from the catalog
/// service at add time and are snapshotted on the line item.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn CatalogClient>,
    event_sender: Arc<EventSender>,
    default_currency: String,
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Cart with items
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn CatalogClient>,
        event_sender: Arc<EventSender>,
        default_currency: String,
    ) -> Self {
        Self {
            db,
            catalog,
            event_sender,
            default_currency,
        }
    }

    /// Returns the shopper's current cart, creating an empty one on first
    /// access.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.find_or_create_cart(&*self.db, customer_id).await?;
        let items = cart.find_related(CartItem).all(&*self.db).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Adds a product to the cart, or increments the quantity of an existing
    /// line item for the same product.
    ///
    /// The catalog is consulted for the authoritative price and current
    /// stock; the snapshot price on an existing line is kept.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        // Resolve the product before opening the transaction; the catalog is
        // an external round trip.
        let product = self.catalog.product(input.product_id).await?;

        let txn = self.db.begin().await?;
        let cart = self.find_or_create_cart(&txn, customer_id).await?;

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        let requested_quantity = existing_item
            .as_ref()
            .map(|item| item.quantity + input.quantity)
            .unwrap_or(input.quantity);
        if product.stock < requested_quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} of {} in stock",
                product.stock, product.name
            )));
        }

        if let Some(item) = existing_item {
            let unit_price = item.unit_price;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(requested_quantity);
            item.line_total = Set(unit_price * Decimal::from(requested_quantity));
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let line_total = product.price * Decimal::from(input.quantity);
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(input.product_id),
                product_name: Set(product.name.clone()),
                quantity: Set(input.quantity),
                unit_price: Set(product.price),
                line_total: Set(line_total),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        let cart_id = cart.id;
        let updated = self.recalculate_subtotal(&txn, cart_id).await?;
        let items = updated.find_related(CartItem).all(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{}",
            cart_id, input.product_id, input.quantity
        );
        Ok(CartWithItems {
            cart: updated,
            items,
        })
    }

    /// Sets the quantity of a cart item, removing the item when the quantity
    /// drops to zero or below.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        customer_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.active_cart(&txn, customer_id).await?;
        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if item.cart_id != cart.id {
            return Err(ServiceError::InvalidOperation(
                "Item does not belong to this cart".to_string(),
            ));
        }

        let removed = quantity <= 0;
        if removed {
            item.delete(&txn).await?;
        } else {
            let unit_price = item.unit_price;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.line_total = Set(unit_price * Decimal::from(quantity));
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        }

        let cart_id = cart.id;
        let updated = self.recalculate_subtotal(&txn, cart_id).await?;
        let items = updated.find_related(CartItem).all(&txn).await?;
        txn.commit().await?;

        let event = if removed {
            Event::CartItemRemoved { cart_id, item_id }
        } else {
            Event::CartItemUpdated { cart_id, item_id }
        };
        self.event_sender.send_or_log(event).await;

        Ok(CartWithItems {
            cart: updated,
            items,
        })
    }

    /// Removes all items from the shopper's cart.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.active_cart(&txn, customer_id).await?;
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart_id = cart.id;
        let updated = self.recalculate_subtotal(&txn, cart_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart_id))
            .await;

        info!("Cleared cart {}", cart_id);
        Ok(CartWithItems {
            cart: updated,
            items: Vec::new(),
        })
    }

    /// The shopper's active cart, for use by the order assembler.
    pub async fn active_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_desc(cart::Column::CreatedAt)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart".to_string()))
    }

    async fn find_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        match self.active_cart(conn, customer_id).await {
            Ok(cart) => Ok(cart),
            Err(ServiceError::NotFound(_)) => {
                let cart_id = Uuid::new_v4();
                let cart = cart::ActiveModel {
                    id: Set(cart_id),
                    customer_id: Set(customer_id),
                    currency: Set(self.default_currency.clone()),
                    subtotal: Set(Decimal::ZERO),
                    status: Set(cart::CartStatus::Active),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                let cart = cart.insert(conn).await?;
                info!("Created cart {} for customer {}", cart_id, customer_id);
                Ok(cart)
            }
            Err(e) => Err(e),
        }
    }

    /// Recomputes the cart subtotal from its line totals.
    async fn recalculate_subtotal<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();

        let mut cart: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        cart.subtotal = Set(subtotal);
        cart.updated_at = Set(Utc::now());

        Ok(cart.update(conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_is_unit_price_times_quantity() {
        let unit_price = dec!(100000);
        let quantity = 2;
        assert_eq!(unit_price * Decimal::from(quantity), dec!(200000));
    }

    #[test]
    fn subtotal_sums_line_totals() {
        // Two items: 100,000 x2 and 50,000 x1 -> 250,000
        let line_totals = [dec!(200000), dec!(50000)];
        let subtotal: Decimal = line_totals.iter().copied().sum();
        assert_eq!(subtotal, dec!(250000));
    }

    #[test]
    fn add_item_input_deserializes() {
        let json = r#"{
            "product_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 3
        }"#;
        let input: AddItemInput = serde_json::from_str(json).expect("valid input");
        assert_eq!(input.quantity, 3);
    }
}
