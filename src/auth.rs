//! Request identity extraction.
//!
//! Bearer tokens are resolved through the identity provider once per request
//! and the resulting [`Identity`] is handed to services as an explicit
//! argument. Authentication mechanics (issuing, refreshing, revoking tokens)
//! belong to the identity provider, not this service.

use axum::{async_trait, extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use std::sync::Arc;

use crate::clients::Identity;
use crate::errors::ServiceError;
use crate::AppState;

/// An authenticated shopper.
#[derive(Debug, Clone)]
pub struct Shopper(pub Identity);

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct Admin(pub Identity);

fn bearer_token(parts: &Parts) -> Result<&str, ServiceError> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Shopper {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let identity = state.identity.resolve(token).await?;
        Ok(Shopper(identity))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Admin {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let identity = state.identity.resolve(token).await?;
        if !identity.is_admin {
            return Err(ServiceError::Forbidden(
                "administrator privileges required".to_string(),
            ));
        }
        Ok(Admin(identity))
    }
}
