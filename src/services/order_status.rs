use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, ModelTrait, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{order, payment, Order, OrderStatus, Payment, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Administrative order status transitions.
///
/// Every change is validated against [`OrderStatus::can_transition_to`];
/// an illegal request is rejected with both states named and the order row
/// untouched — never clamped or silently ignored.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Applies an administrative status transition.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            error!(
                "Rejected status transition {} -> {} for order {}",
                old_status, new_status, order_id
            );
            return Err(ServiceError::InvalidTransition {
                from: old_status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        // Admin cancellation voids live payment handles too, same as the
        // shopper path.
        let mut payments_to_refund = Vec::new();
        if new_status == OrderStatus::Cancelled {
            let handles = order.find_related(Payment).all(&txn).await?;
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
        }

        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        if new_status == OrderStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled {
                    order_id,
                    payments_to_refund,
                })
                .await;
        }

        info!(
            "Order {} status updated from '{}' to '{}'",
            order_id, old_status, new_status
        );
        Ok(updated)
    }

    /// Current status of an order.
    pub async fn get_status(&self, order_id: Uuid) -> Result<OrderStatus, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        Ok(order.status)
    }
}
