//! Payment gateway webhooks.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use gamevault_engine::crypto::verify_signature;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Gateway webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Webhook delivery id.
    pub id: String,
    /// Event type, e.g. `payment.succeeded`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: PaymentWebhookData,
}

/// Payment the webhook is about.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookData {
    /// Gateway payment id.
    pub payment_id: String,
    /// Decline reason, for failures.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle payment gateway webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.webhook_secret.as_deref().ok_or_else(|| {
        tracing::warn!("Payment webhook received but no webhook secret is configured");
        ApiError::Unauthorized
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing gateway signature".into()))?;

    if !verify_signature(secret, &body, signature) {
        tracing::warn!("Invalid payment webhook signature");
        return Err(ApiError::Unauthorized);
    }

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        webhook_id = %webhook.id,
        payment_id = %webhook.data.payment_id,
        "Received payment webhook"
    );

    let purchases = state.economy.purchases();
    match webhook.event_type.as_str() {
        "payment.succeeded" => {
            let purchase = purchases
                .complete_from_webhook(&webhook.data.payment_id)
                .await?;
            tracing::info!(purchase_id = %purchase.id, status = %purchase.status, "Purchase settled by webhook");
        }
        "payment.failed" => {
            let reason = webhook
                .data
                .reason
                .as_deref()
                .unwrap_or("payment_failed");
            let purchase = purchases
                .fail_from_webhook(&webhook.data.payment_id, reason)
                .await?;
            tracing::info!(purchase_id = %purchase.id, reason = %reason, "Purchase failed by webhook");
        }
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled payment event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}
