pub mod carts;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payment_callbacks;
pub mod payments;

use std::sync::Arc;

use crate::clients::CatalogClient;
use crate::events::EventSender;
use crate::services::{
    carts::CartService, coupons::CouponService, gateways::GatewayRegistry,
    order_status::OrderStatusService, orders::OrderService, payments::PaymentService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(
        db: Arc<sea_orm::DatabaseConnection>,
        catalog: Arc<dyn CatalogClient>,
        gateways: Arc<GatewayRegistry>,
        event_sender: Arc<EventSender>,
        default_currency: String,
    ) -> Self {
        let coupons = Arc::new(CouponService::new(db.clone(), event_sender.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            catalog.clone(),
            event_sender.clone(),
            default_currency,
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            catalog,
            coupons.clone(),
            event_sender.clone(),
        ));
        let order_status = Arc::new(OrderStatusService::new(db.clone(), event_sender.clone()));
        let payments = Arc::new(PaymentService::new(db, gateways, event_sender));

        Self {
            carts,
            coupons,
            orders,
            order_status,
            payments,
        }
    }
}
