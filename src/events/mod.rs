use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, PaymentGatewayKind};

/// Events emitted by the checkout core.
///
/// Consumers (notification senders, refund workers, analytics) subscribe via
/// the processing loop; emission is fire-and-forget and never blocks a
/// request on a slow consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),

    // Coupon events
    CouponCreated(Uuid),
    CouponRedeemed { coupon_id: Uuid, order_id: Uuid },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    /// Carries the ids of confirmed payments that still need a gateway-side
    /// refund, for a downstream compensation worker.
    OrderCancelled {
        order_id: Uuid,
        payments_to_refund: Vec<Uuid>,
    },

    // Payment events
    PaymentInitiated {
        payment_id: Uuid,
        order_id: Uuid,
        gateway: PaymentGatewayKind,
    },
    PaymentConfirmed { payment_id: Uuid, order_id: Uuid },
    PaymentFailed { payment_id: Uuid, order_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing if the channel is closed.
    /// Request handling must not fail because an event could not be queued.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Processes incoming events. Currently logs them; downstream consumers
/// (mail, refunds, analytics) hook in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderCancelled {
                order_id,
                payments_to_refund,
            } => {
                if payments_to_refund.is_empty() {
                    info!(%order_id, "order cancelled");
                } else {
                    // Refund execution is owned by the payment-ops worker.
                    warn!(
                        %order_id,
                        payments = ?payments_to_refund,
                        "order cancelled with confirmed payments pending refund"
                    );
                }
            }
            Event::PaymentConfirmed {
                payment_id,
                order_id,
            } => {
                info!(%payment_id, %order_id, "payment confirmed");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }

    info!("Event processing loop stopped");
}
