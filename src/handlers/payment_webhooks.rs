use crate::{errors::ServiceError, psp::GatewayChargeStatus, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct GatewayWebhookPayload {
    charge_id: String,
    status: GatewayChargeStatus,
}

/// POST /api/v1/payments/webhook
///
/// Gateway callback for asynchronous payment confirmation (PIX and boleto
/// settle out-of-band). Unknown charge ids are acknowledged: the gateway
/// retries on anything but a 2xx and the charge may belong to another
/// environment.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state.config.payment_webhook_tolerance_secs;
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let payload: GatewayWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {}", e)))?;

    match state
        .services
        .payments
        .apply_gateway_update(&payload.charge_id, payload.status)
        .await
    {
        Ok(()) => {}
        Err(ServiceError::NotFound(_)) => {
            info!(charge_id = %payload.charge_id, "Webhook for unknown charge acknowledged");
        }
        Err(err) => return Err(err),
    }

    Ok((axum::http::StatusCode::OK, "ok"))
}

/// HMAC-SHA256 over `"{timestamp}.{body}"` carried in the `x-timestamp` and
/// `x-signature` headers. The signature comparison is constant-time.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(raw_sig) = hex::decode(sig) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&raw_sig).is_ok()
}

/// Counterpart of [`verify_signature`] used by tooling and tests.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
