// Not every test binary touches every helper.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Sha256, Sha512};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    clients::{Identity, ProductInfo, StaticCatalog, StaticIdentityProvider},
    config::{AppConfig, MomoConfig, VnpayConfig},
    db,
    entities::CouponKind,
    events::{self, EventSender},
    handlers::AppServices,
    services::{coupons::CreateCouponInput, gateways::GatewayRegistry},
    AppState,
};

pub const SHOPPER_TOKEN: &str = "shopper-token";
pub const GOLD_SHOPPER_TOKEN: &str = "gold-shopper-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub const VNPAY_TEST_SECRET: &str = "test-vnpay-hash-secret";
pub const MOMO_TEST_ACCESS_KEY: &str = "test-momo-access";
pub const MOMO_TEST_SECRET: &str = "test-momo-secret";

/// Helper harness spinning up application state backed by a file-based
/// SQLite database, with in-memory catalog and identity fakes.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub catalog: Arc<StaticCatalog>,
    pub shopper: Identity,
    pub gold_shopper: Identity,
    pub admin: Identity,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller tweak the config
    /// first (e.g. point the MoMo create URL at a mock server).
    pub async fn with_config(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig {
            database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: true,
            default_currency: "VND".to_string(),
            catalog_base_url: "http://catalog.invalid".to_string(),
            identity_base_url: "http://identity.invalid".to_string(),
            cors_allowed_origins: None,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            db_acquire_timeout_secs: 5,
            vnpay: VnpayConfig {
                tmn_code: "TESTTMN1".to_string(),
                hash_secret: VNPAY_TEST_SECRET.to_string(),
                payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
                return_url: "http://localhost/api/v1/payments/callbacks/vnpay".to_string(),
            },
            momo: MomoConfig {
                partner_code: "MOMOTEST".to_string(),
                access_key: MOMO_TEST_ACCESS_KEY.to_string(),
                secret_key: MOMO_TEST_SECRET.to_string(),
                create_url: "http://momo.invalid/v2/gateway/api/create".to_string(),
                redirect_url: "http://localhost/checkout/result".to_string(),
                ipn_url: "http://localhost/api/v1/payments/callbacks/momo".to_string(),
            },
        };
        mutate(&mut cfg);

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let catalog = Arc::new(StaticCatalog::new());

        let shopper = Identity {
            customer_id: Uuid::new_v4(),
            tier: None,
            is_admin: false,
        };
        let gold_shopper = Identity {
            customer_id: Uuid::new_v4(),
            tier: Some("gold".to_string()),
            is_admin: false,
        };
        let admin = Identity {
            customer_id: Uuid::new_v4(),
            tier: None,
            is_admin: true,
        };

        let identity_provider = Arc::new(StaticIdentityProvider::new());
        identity_provider.insert(SHOPPER_TOKEN, shopper.clone());
        identity_provider.insert(GOLD_SHOPPER_TOKEN, gold_shopper.clone());
        identity_provider.insert(ADMIN_TOKEN, admin.clone());

        let gateways = Arc::new(GatewayRegistry::new(&cfg, reqwest::Client::new()));

        let services = AppServices::new(
            db_arc.clone(),
            catalog.clone(),
            gateways,
            Arc::new(event_sender.clone()),
            cfg.default_currency.clone(),
        );

        let state = Arc::new(AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            identity: identity_provider,
            services,
        });

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            catalog,
            shopper,
            gold_shopper,
            admin,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for shopper-authenticated JSON requests.
    pub async fn request_as_shopper(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(SHOPPER_TOKEN)).await
    }

    /// Convenience helper for admin-authenticated JSON requests.
    pub async fn request_as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(ADMIN_TOKEN)).await
    }

    /// Seed a product into the in-memory catalog.
    pub fn seed_product(&self, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        self.catalog.insert(ProductInfo {
            id,
            name: format!("Test Product {}", &id.to_string()[..8]),
            price,
            stock,
        });
        id
    }

    /// Seed an active coupon valid for the next 30 days.
    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: CouponKind,
        value: Decimal,
        min_order_amount: Option<Decimal>,
        max_discount: Option<Decimal>,
        usage_limit: Option<i32>,
    ) -> storefront_api::entities::CouponModel {
        self.state
            .services
            .coupons
            .create_coupon(CreateCouponInput {
                code: code.to_string(),
                kind,
                value,
                min_order_amount,
                max_discount,
                starts_at: Utc::now() - Duration::days(1),
                ends_at: Utc::now() + Duration::days(30),
                usage_limit,
                applicable_tiers: None,
            })
            .await
            .expect("seed coupon for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Read a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Sign VNPay callback parameters the way the gateway does: HMAC-SHA512
/// over the sorted url-encoded parameter string.
pub fn vnpay_signed_params(fields: &[(&str, &str)]) -> HashMap<String, String> {
    let signed: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &signed {
        serializer.append_pair(key, value);
    }
    let hash_data = serializer.finish();

    let mut mac = Hmac::<Sha512>::new_from_slice(VNPAY_TEST_SECRET.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(hash_data.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let mut params: HashMap<String, String> = signed.into_iter().collect();
    params.insert("vnp_SecureHash".to_string(), signature);
    params
}

/// Sign a MoMo IPN body over the gateway's canonical field order.
pub fn momo_signed_ipn(order_id: &str, amount: i64, result_code: i64) -> Value {
    let raw = format!(
        "accessKey={}&amount={}&extraData=&message=Successful.&orderId={}&orderInfo=Payment&orderType=momo_wallet&partnerCode=MOMOTEST&payType=qr&requestId=req-1&responseTime=1700000000000&resultCode={}&transId=99887766",
        MOMO_TEST_ACCESS_KEY, amount, order_id, result_code,
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(MOMO_TEST_SECRET.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    serde_json::json!({
        "partnerCode": "MOMOTEST",
        "orderId": order_id,
        "requestId": "req-1",
        "amount": amount,
        "orderInfo": "Payment",
        "orderType": "momo_wallet",
        "transId": 99887766i64,
        "resultCode": result_code,
        "message": "Successful.",
        "payType": "qr",
        "responseTime": 1700000000000i64,
        "extraData": "",
        "signature": signature,
    })
}
