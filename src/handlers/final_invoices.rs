//! Final invoice and extras ledger handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FinalInvoice, UpdateExtraItem, WorkExtraItem};
use crate::services::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct FinalInvoiceResponse {
    #[serde(flatten)]
    pub invoice: FinalInvoice,
    pub extra_items: Vec<WorkExtraItem>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFinalInvoiceRequest {
    pub work_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AddExtraItemRequest {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInvoiceStatusRequest {
    pub status: String,
    pub payment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

pub async fn create_final_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateFinalInvoiceRequest>,
) -> Result<(StatusCode, Json<FinalInvoiceResponse>), AppError> {
    let invoice = state
        .final_invoices
        .create_final_invoice(payload.work_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(FinalInvoiceResponse {
            invoice,
            extra_items: Vec::new(),
        }),
    ))
}

pub async fn get_final_invoice(
    State(state): State<AppState>,
    Path(final_invoice_id): Path<Uuid>,
) -> Result<Json<FinalInvoiceResponse>, AppError> {
    let invoice = state
        .db
        .get_final_invoice(final_invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Final invoice not found")))?;
    let extra_items = state.db.get_extra_items(final_invoice_id).await?;

    Ok(Json(FinalInvoiceResponse {
        invoice,
        extra_items,
    }))
}

pub async fn add_extra_item(
    State(state): State<AppState>,
    Path(final_invoice_id): Path<Uuid>,
    Json(payload): Json<AddExtraItemRequest>,
) -> Result<(StatusCode, Json<FinalInvoiceResponse>), AppError> {
    let (invoice, _item) = state
        .final_invoices
        .add_extra_item(
            final_invoice_id,
            &payload.description,
            payload.quantity,
            payload.unit_price,
        )
        .await?;
    let extra_items = state.db.get_extra_items(final_invoice_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(FinalInvoiceResponse {
            invoice,
            extra_items,
        }),
    ))
}

pub async fn update_extra_item(
    State(state): State<AppState>,
    Path(extra_item_id): Path<Uuid>,
    Json(patch): Json<UpdateExtraItem>,
) -> Result<Json<FinalInvoiceResponse>, AppError> {
    let (invoice, _item) = state
        .final_invoices
        .update_extra_item(extra_item_id, patch)
        .await?;
    let extra_items = state.db.get_extra_items(invoice.final_invoice_id).await?;

    Ok(Json(FinalInvoiceResponse {
        invoice,
        extra_items,
    }))
}

pub async fn remove_extra_item(
    State(state): State<AppState>,
    Path(extra_item_id): Path<Uuid>,
) -> Result<Json<FinalInvoiceResponse>, AppError> {
    let invoice = state.final_invoices.remove_extra_item(extra_item_id).await?;
    let extra_items = state.db.get_extra_items(invoice.final_invoice_id).await?;

    Ok(Json(FinalInvoiceResponse {
        invoice,
        extra_items,
    }))
}

pub async fn update_invoice_status(
    State(state): State<AppState>,
    Path(final_invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceStatusRequest>,
) -> Result<Json<FinalInvoiceResponse>, AppError> {
    let invoice = state
        .final_invoices
        .update_status(
            final_invoice_id,
            &payload.status,
            payload.payment_date,
            payload.notes,
        )
        .await?;
    let extra_items = state.db.get_extra_items(final_invoice_id).await?;

    Ok(Json(FinalInvoiceResponse {
        invoice,
        extra_items,
    }))
}
