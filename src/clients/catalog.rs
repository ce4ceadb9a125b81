use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Product facts supplied by the catalog service. The checkout core treats
/// these as authoritative and never computes prices on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Looks a product up by reference.
    async fn product(&self, product_id: Uuid) -> Result<ProductInfo, ServiceError>;
}

/// HTTP client for the catalog service
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn product(&self, product_id: Uuid) -> Result<ProductInfo, ServiceError> {
        let url = format!("{}/products/{}", self.base_url, product_id);
        let response = self.http.get(&url).send().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("catalog service unreachable: {}", e))
        })?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            ))),
            status if status.is_success() => response.json::<ProductInfo>().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!(
                    "catalog service returned an unexpected payload: {}",
                    e
                ))
            }),
            status => Err(ServiceError::ExternalServiceError(format!(
                "catalog service returned {}",
                status
            ))),
        }
    }
}

/// In-memory catalog used by tests and local development.
#[derive(Default)]
pub struct StaticCatalog {
    products: RwLock<HashMap<Uuid, ProductInfo>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: ProductInfo) {
        self.products
            .write()
            .expect("catalog lock poisoned")
            .insert(product.id, product);
    }

    pub fn set_stock(&self, product_id: Uuid, stock: i32) {
        if let Some(product) = self
            .products
            .write()
            .expect("catalog lock poisoned")
            .get_mut(&product_id)
        {
            product.stock = stock;
        }
    }
}

#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn product(&self, product_id: Uuid) -> Result<ProductInfo, ServiceError> {
        self.products
            .read()
            .expect("catalog lock poisoned")
            .get(&product_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}
