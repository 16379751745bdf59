//! Payment gateway webhook handler.
//!
//! Verifies the signature against the raw body, acknowledges immediately,
//! and hands the event to the reconciler on a background task. The gateway
//! retries on non-2xx, so reconciliation failures must not affect the
//! response.

use axum::{extract::State, http::HeaderMap, http::StatusCode};

use crate::services::gateway::SIGNATURE_HEADER;
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::AppError;
use crate::AppState;

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", SIGNATURE_HEADER);
            AppError::InvalidSignature(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let valid = state
        .gateway
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Signature verification error");
            AppError::InternalError(anyhow::anyhow!("Signature verification failed"))
        })?;
    if !valid {
        tracing::warn!("Webhook signature mismatch");
        return Err(AppError::InvalidSignature(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = state.gateway.parse_webhook_event(&body).map_err(|e| {
        tracing::warn!(error = %e, "Unparseable webhook payload");
        AppError::ValidationError(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[event.event_type.as_str(), "received"])
        .inc();

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type,
        "Webhook accepted, reconciling in background"
    );

    let reconciler = state.reconciler.clone();
    tokio::spawn(async move {
        if let Err(e) = reconciler.process(event).await {
            tracing::error!(error = %e, "Webhook reconciliation failed");
        }
    });

    Ok(StatusCode::OK)
}
