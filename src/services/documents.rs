//! Document generator client.
//!
//! Sends a fully denormalized financial document to the render service and
//! returns the stored artifact path. For any document carrying a positive
//! balance the payload includes a payment link for the generator to embed.

use crate::services::error::AppError;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone)]
pub struct DocumentClient {
    client: Client,
    base_url: String,
}

/// Kind of financial document being rendered.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Budget,
    FinalInvoice,
    ChangeOrder,
}

/// One flattened line on a rendered document.
#[derive(Debug, Clone, Serialize)]
pub struct RenderLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Denormalized render payload.
#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub kind: DocumentKind,
    pub reference_id: Uuid,
    pub title: String,
    pub recipient_name: Option<String>,
    pub lines: Vec<RenderLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub balance_due: Decimal,
    /// Payment-initiation link; required whenever `balance_due` is positive.
    pub payment_url: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    path: String,
}

impl DocumentClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Render a document and return the artifact path.
    pub async fn render(&self, request: &RenderRequest) -> Result<String, AppError> {
        let url = format!("{}/render", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalService(anyhow::anyhow!("Document render request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(anyhow::anyhow!(
                "Document render failed ({}): {}",
                status,
                body
            )));
        }

        let rendered: RenderResponse = response.json().await.map_err(|e| {
            AppError::ExternalService(anyhow::anyhow!("Invalid render response: {}", e))
        })?;

        tracing::info!(
            reference_id = %request.reference_id,
            path = %rendered.path,
            "Document rendered"
        );

        Ok(rendered.path)
    }
}
