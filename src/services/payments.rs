use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    clients::Identity,
    entities::{
        order, payment, Order, OrderStatus, Payment, PaymentGatewayKind, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::gateways::{constant_time_eq, CreateHandleRequest, GatewayRegistry},
};

/// Payment initiation and confirmation.
///
/// Initiation hands out gateway handles under the one-live-handle policy:
/// re-initiating with the same gateway reuses the existing unconfirmed
/// handle, switching gateways supersedes it. Confirmation is idempotent on
/// the handle and reconciles the collected amount against the order total
/// before the order is marked paid.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateways: Arc<GatewayRegistry>,
    event_sender: Arc<EventSender>,
}

/// Order and handle state after a confirmation attempt
#[derive(Debug, Serialize)]
pub struct ConfirmationResult {
    pub order: order::Model,
    pub payment: payment::Model,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateways: Arc<GatewayRegistry>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateways,
            event_sender,
        }
    }

    /// Requests a payment handle for an order. Also serves repays: an order
    /// whose earlier handles failed simply initiates again.
    #[instrument(skip(self, shopper), fields(customer_id = %shopper.customer_id))]
    pub async fn initiate(
        &self,
        shopper: &Identity,
        order_id: Uuid,
        gateway: PaymentGatewayKind,
    ) -> Result<payment::Model, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.customer_id == shopper.customer_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if !matches!(order.status, OrderStatus::PaymentPending | OrderStatus::New) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status '{}' is not awaiting payment",
                order.status
            )));
        }

        let handles = Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        if handles.iter().any(|h| h.status == PaymentStatus::Confirmed) {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been paid",
                order.order_number
            )));
        }

        // Idempotent reuse: a live handle for the same gateway is returned
        // unchanged instead of minting an unbounded number of attempts.
        if let Some(existing) = handles
            .iter()
            .find(|h| h.status == PaymentStatus::Created && h.gateway == gateway)
        {
            info!(
                "Reusing existing {} handle {} for order {}",
                gateway, existing.external_reference, order_id
            );
            return Ok(existing.clone());
        }

        let handle = self
            .gateways
            .get(gateway)
            .create_handle(CreateHandleRequest {
                order_id,
                order_number: &order.order_number,
                amount: order.total,
                currency: &order.currency,
            })
            .await?;

        let txn = self.db.begin().await?;

        // Switching gateways supersedes the previous live handle; at most
        // one handle per order stays confirmable.
        for stale in handles
            .into_iter()
            .filter(|h| h.status == PaymentStatus::Created)
        {
            let reference = stale.external_reference.clone();
            let mut active: payment::ActiveModel = stale.into();
            active.status = Set(PaymentStatus::Failed);
            active.update(&txn).await?;
            warn!("Superseded payment handle {} for order {}", reference, order_id);
        }

        let payment_id = Uuid::new_v4();
        let row = payment::ActiveModel {
            id: Set(payment_id),
            order_id: Set(order_id),
            gateway: Set(gateway),
            external_reference: Set(handle.external_reference),
            client_secret: Set(handle.client_secret),
            redirect_url: Set(handle.redirect_url),
            amount: Set(order.total),
            currency: Set(order.currency.clone()),
            status: Set(PaymentStatus::Created),
            created_at: Set(Utc::now()),
            confirmed_at: Set(None),
        };
        let row = row.insert(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentInitiated {
                payment_id,
                order_id,
                gateway,
            })
            .await;

        info!(
            "Initiated {} payment {} for order {}",
            gateway, row.external_reference, order_id
        );
        Ok(row)
    }

    /// Confirms a card intent with its client secret (two-step card flow).
    #[instrument(skip(self, client_secret))]
    pub async fn confirm(
        &self,
        reference: &str,
        client_secret: &str,
    ) -> Result<ConfirmationResult, ServiceError> {
        let handle = self.find_by_reference(reference).await?;

        if handle.gateway != PaymentGatewayKind::Card {
            return Err(ServiceError::InvalidOperation(format!(
                "Payments via {} are confirmed by the gateway callback",
                handle.gateway
            )));
        }

        let matches = handle
            .client_secret
            .as_deref()
            .map(|expected| constant_time_eq(expected, client_secret))
            .unwrap_or(false);
        if !matches {
            return Err(ServiceError::Unauthorized(
                "client secret does not match the payment intent".to_string(),
            ));
        }

        self.finalize(handle.id, true, None).await
    }

    /// Applies a verified gateway callback (VNPay return/IPN, MoMo IPN).
    /// Repeated deliveries after the first successful confirmation are
    /// no-ops returning the current state.
    #[instrument(skip(self, params))]
    pub async fn apply_callback(
        &self,
        gateway: PaymentGatewayKind,
        params: &HashMap<String, String>,
    ) -> Result<ConfirmationResult, ServiceError> {
        let outcome = self.gateways.get(gateway).verify_callback(params)?;

        let handle = self.find_by_reference(&outcome.external_reference).await?;
        if handle.gateway != gateway {
            return Err(ServiceError::InvalidOperation(format!(
                "Payment {} does not belong to gateway {}",
                outcome.external_reference, gateway
            )));
        }

        if !outcome.success {
            info!(
                "Gateway {} reported failure (code {}) for payment {}",
                gateway, outcome.gateway_code, outcome.external_reference
            );
        }

        self.finalize(handle.id, outcome.success, outcome.amount)
            .await
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<payment::Model, ServiceError> {
        Payment::find()
            .filter(payment::Column::ExternalReference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", reference)))
    }

    /// Settles a handle. Idempotent: a handle that is already confirmed (or
    /// already failed, for a failure report) returns the current state
    /// without another credit. Exactly one handle per order can pass the
    /// confirmation write.
    async fn finalize(
        &self,
        payment_id: Uuid,
        success: bool,
        reported_amount: Option<Decimal>,
    ) -> Result<ConfirmationResult, ServiceError> {
        let txn = self.db.begin().await?;

        let handle = Payment::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;
        let order = Order::find_by_id(handle.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", handle.order_id))
            })?;

        match handle.status {
            PaymentStatus::Confirmed => {
                // Duplicate delivery after confirmation: return current state.
                info!(
                    "Payment {} already confirmed; ignoring repeat delivery",
                    handle.external_reference
                );
                return Ok(ConfirmationResult {
                    order,
                    payment: handle,
                });
            }
            PaymentStatus::Failed => {
                if success {
                    // A superseded or voided handle cannot confirm anymore.
                    return Err(ServiceError::Conflict(format!(
                        "Payment {} is no longer active",
                        handle.external_reference
                    )));
                }
                return Ok(ConfirmationResult {
                    order,
                    payment: handle,
                });
            }
            PaymentStatus::Created => {}
        }

        let order_id = order.id;
        let payment_reference = handle.external_reference.clone();

        if !success {
            let mut active: payment::ActiveModel = handle.into();
            active.status = Set(PaymentStatus::Failed);
            let payment = active.update(&txn).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    payment_id,
                    order_id,
                })
                .await;
            info!("Payment {} marked failed", payment_reference);
            // The order is left as-is; the shopper may repay.
            return Ok(ConfirmationResult { order, payment });
        }

        let other_confirmed = Payment::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Confirmed))
            .filter(payment::Column::Id.ne(payment_id))
            .one(&txn)
            .await?;
        if other_confirmed.is_some() {
            let mut active: payment::ActiveModel = handle.into();
            active.status = Set(PaymentStatus::Failed);
            active.update(&txn).await?;
            txn.commit().await?;
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been paid by another transaction",
                order.order_number
            )));
        }

        if order.status == OrderStatus::Cancelled {
            let mut active: payment::ActiveModel = handle.into();
            active.status = Set(PaymentStatus::Failed);
            active.update(&txn).await?;
            txn.commit().await?;
            return Err(ServiceError::Conflict(format!(
                "Order {} has been cancelled",
                order.order_number
            )));
        }

        // Reconcile the collected amount against the order before crediting.
        if let Some(amount) = reported_amount {
            if amount != order.total {
                let mut active: payment::ActiveModel = handle.into();
                active.status = Set(PaymentStatus::Failed);
                active.update(&txn).await?;
                txn.commit().await?;

                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        payment_id,
                        order_id,
                    })
                    .await;
                return Err(ServiceError::InvalidOperation(format!(
                    "Collected amount {} does not match order total {}",
                    amount, order.total
                )));
            }
        }

        let now = Utc::now();
        let mut active: payment::ActiveModel = handle.into();
        active.status = Set(PaymentStatus::Confirmed);
        active.confirmed_at = Set(Some(now));
        let payment = active.update(&txn).await?;

        let old_status = order.status;
        let new_status = match old_status {
            OrderStatus::PaymentPending => OrderStatus::New,
            OrderStatus::New => OrderStatus::Processing,
            other => other,
        };

        let version = order.version;
        let mut order_active: order::ActiveModel = order.into();
        order_active.status = Set(new_status);
        order_active.paid_at = Set(Some(now));
        order_active.updated_at = Set(Some(now));
        order_active.version = Set(version + 1);
        let order = order_active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                payment_id,
                order_id,
            })
            .await;
        if new_status != old_status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        info!(
            "Payment {} confirmed; order {} is now '{}'",
            payment_reference, order_id, new_status
        );
        Ok(ConfirmationResult { order, payment })
    }
}
