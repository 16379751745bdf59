//! Payment gateway client.
//!
//! Implements hosted checkout session creation, webhook signature
//! verification, and event envelope parsing for the payment gateway.

use crate::config::GatewayConfig;
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Event kinds this service acts on; everything else is accepted and ignored.
pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Metadata keys used for inbound routing.
pub const META_PURPOSE: &str = "purpose";
pub const META_BUDGET_ID: &str = "budget_id";
pub const META_FINAL_INVOICE_ID: &str = "final_invoice_id";
pub const META_WORK_ID: &str = "work_id";

pub const PURPOSE_INVOICE_PAYMENT: &str = "invoice_payment";
pub const PURPOSE_FINAL_INVOICE_PAYMENT: &str = "final_invoice_payment";

/// Gateway client for outbound calls and webhook verification.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

/// Request to create a hosted checkout session.
#[derive(Debug, Serialize)]
struct CreateSessionRequest {
    /// Amount in the smallest currency unit (cents).
    amount: i64,
    description: String,
    success_url: String,
    cancel_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<String>,
    /// Opaque map echoed back on webhook events; used for inbound routing.
    metadata: HashMap<String, String>,
}

/// Hosted checkout session returned by the gateway.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
    pub payment_intent: Option<String>,
}

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: PaymentObject,
}

/// The session/payment object carried by an event.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentObject {
    pub id: String,
    pub payment_intent: Option<String>,
    /// Amount actually paid, in the smallest currency unit.
    pub amount_total: Option<i64>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn fee_rate(&self) -> rust_decimal::Decimal {
        self.config.fee_rate
    }

    /// Create a hosted checkout session.
    ///
    /// # Arguments
    /// * `amount` - Amount in the smallest currency unit (cents)
    /// * `description` - Human-readable charge description
    /// * `customer_email` - Optional prefilled customer email
    /// * `metadata` - Routing metadata echoed back on webhook events
    pub async fn create_checkout_session(
        &self,
        amount: i64,
        description: &str,
        customer_email: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<CheckoutSession> {
        let request = CreateSessionRequest {
            amount,
            description: description.to_string(),
            success_url: self.config.success_url.clone(),
            cancel_url: self.config.cancel_url.clone(),
            customer_email: customer_email.map(str::to_string),
            metadata,
        };

        let url = format!("{}/checkout/sessions", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.secret_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, "Gateway create_checkout_session response");

        if status.is_success() {
            let session: CheckoutSession = serde_json::from_str(&body)?;
            tracing::info!(
                session_id = %session.id,
                amount = amount,
                "Checkout session created"
            );
            Ok(session)
        } else {
            tracing::error!(status = %status, body = %body, "Checkout session creation failed");
            Err(anyhow!("Gateway error ({}): {}", status, body))
        }
    }

    /// Verify the webhook signature over the raw request body.
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> Result<bool> {
        let expected =
            compute_signature(body, self.config.webhook_secret.expose_secret())?;

        let is_valid = expected == signature;

        if !is_valid {
            tracing::warn!("Webhook signature verification failed");
        }

        Ok(is_valid)
    }

    /// Parse a webhook event envelope from the request body.
    pub fn parse_webhook_event(&self, body: &str) -> Result<WebhookEvent> {
        let event: WebhookEvent = serde_json::from_str(body)?;
        Ok(event)
    }
}

/// Compute the hex-encoded HMAC-SHA256 signature of a payload.
pub fn compute_signature(payload: &str, secret: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("Invalid key length"))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: "https://api.gateway.example.com/v1".to_string(),
            fee_rate: "0.03".parse().unwrap(),
            success_url: "https://example.com/success".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
        }
    }

    #[test]
    fn test_valid_signature() {
        let client = GatewayClient::new(test_config());
        let body = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let signature = compute_signature(body, "whsec_test").unwrap();
        assert!(client.verify_webhook_signature(body, &signature).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let client = GatewayClient::new(test_config());
        let body = r#"{"id":"evt_1"}"#;
        assert!(!client
            .verify_webhook_signature(body, "deadbeef")
            .unwrap());
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let client = GatewayClient::new(test_config());
        let signature = compute_signature(r#"{"amount_total":20600}"#, "whsec_test").unwrap();
        assert!(!client
            .verify_webhook_signature(r#"{"amount_total":99900}"#, &signature)
            .unwrap());
    }

    #[test]
    fn test_parse_webhook_event() {
        let client = GatewayClient::new(test_config());
        let body = r#"{
            "id": "evt_42",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_123",
                    "payment_intent": "pi_456",
                    "amount_total": 20600,
                    "customer_email": "client@example.com",
                    "metadata": {"purpose": "invoice_payment", "budget_id": "7e6f0cb1-51ea-4a41-9b52-1f4e2f2e2f2e"}
                }
            }
        }"#;

        let event = client.parse_webhook_event(body).unwrap();
        assert_eq!(event.event_type, EVENT_CHECKOUT_COMPLETED);
        assert_eq!(event.data.object.id, "cs_123");
        assert_eq!(event.data.object.amount_total, Some(20600));
        assert_eq!(
            event.data.object.metadata.get(META_PURPOSE).map(String::as_str),
            Some(PURPOSE_INVOICE_PAYMENT)
        );
    }
}
