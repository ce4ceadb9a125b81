use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Acting identity resolved from an opaque bearer token.
///
/// Passed explicitly into every core operation; nothing in the service layer
/// reads session state ambiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub customer_id: Uuid,
    /// Loyalty tier, used for coupon tier restrictions.
    pub tier: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Resolves a bearer token to an identity. The token itself is opaque to
    /// this service.
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, ServiceError>;
}

/// HTTP client for the identity provider
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, ServiceError> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer_token)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!(
                    "identity provider unreachable: {}",
                    e
                ))
            })?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED => Err(ServiceError::Unauthorized(
                "invalid or expired session token".to_string(),
            )),
            status if status.is_success() => response.json::<Identity>().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!(
                    "identity provider returned an unexpected payload: {}",
                    e
                ))
            }),
            status => Err(ServiceError::ExternalServiceError(format!(
                "identity provider returned {}",
                status
            ))),
        }
    }
}

/// In-memory token table used by tests and local development.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens
            .write()
            .expect("identity lock poisoned")
            .insert(token.into(), identity);
    }
}

#[async_trait]
impl IdentityClient for StaticIdentityProvider {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, ServiceError> {
        self.tokens
            .read()
            .expect("identity lock poisoned")
            .get(bearer_token)
            .cloned()
            .ok_or_else(|| {
                ServiceError::Unauthorized("invalid or expired session token".to_string())
            })
    }
}
