use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::{entities::PaymentGatewayKind, errors::ServiceError, AppState};

/// Creates the router for inbound gateway callbacks.
///
/// These endpoints are unauthenticated by design; every callback is
/// signature-verified by the gateway adapter before anything is trusted, and
/// repeated deliveries settle to the same state.
pub fn callback_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/callbacks/vnpay", get(vnpay_callback))
        .route("/callbacks/momo", post(momo_callback))
}

/// VNPay return/IPN callback (query-string parameters).
///
/// VNPay expects an HTTP 200 with an `RspCode` body on every delivery; the
/// code tells the gateway whether to stop retrying.
async fn vnpay_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let result = state
        .services
        .payments
        .apply_callback(PaymentGatewayKind::Vnpay, &params)
        .await;

    let (rsp_code, message) = match &result {
        Ok(confirmation) => {
            info!(
                order_id = %confirmation.order.id,
                "VNPay callback processed"
            );
            ("00", "Confirm Success".to_string())
        }
        Err(err) => (vnpay_rsp_code(err), err.response_message()),
    };

    (
        StatusCode::OK,
        Json(json!({ "RspCode": rsp_code, "Message": message })),
    )
        .into_response()
}

/// VNPay result codes for the IPN acknowledgement body
fn vnpay_rsp_code(err: &ServiceError) -> &'static str {
    match err {
        ServiceError::NotFound(_) => "01",
        ServiceError::Conflict(_) => "02",
        ServiceError::InvalidOperation(_) => "04",
        ServiceError::Unauthorized(_) => "97",
        _ => "99",
    }
}

/// MoMo IPN callback (JSON body). MoMo treats a 204 as acknowledged.
async fn momo_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ServiceError> {
    let params = flatten_params(&body);
    let confirmation = state
        .services
        .payments
        .apply_callback(PaymentGatewayKind::Momo, &params)
        .await?;

    info!(order_id = %confirmation.order.id, "MoMo IPN processed");
    Ok(StatusCode::NO_CONTENT)
}

/// Flattens a JSON callback body to the string map the gateway adapters
/// verify signatures over. MoMo sends numbers for amount/transId; their
/// canonical signing string uses the plain decimal rendering.
fn flatten_params(body: &Value) -> HashMap<String, String> {
    body.as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_params_renders_numbers_without_quotes() {
        let body = json!({
            "orderId": "ORD-AB12CD34-0f9e8d7c",
            "amount": 230000,
            "resultCode": 0,
            "message": "Successful."
        });
        let params = flatten_params(&body);
        assert_eq!(params["amount"], "230000");
        assert_eq!(params["resultCode"], "0");
        assert_eq!(params["orderId"], "ORD-AB12CD34-0f9e8d7c");
    }

    #[test]
    fn vnpay_rsp_codes_follow_the_protocol() {
        assert_eq!(vnpay_rsp_code(&ServiceError::NotFound("x".into())), "01");
        assert_eq!(vnpay_rsp_code(&ServiceError::Conflict("x".into())), "02");
        assert_eq!(vnpay_rsp_code(&ServiceError::Unauthorized("x".into())), "97");
        assert_eq!(
            vnpay_rsp_code(&ServiceError::InternalError("x".into())),
            "99"
        );
    }
}
