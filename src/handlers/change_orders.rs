//! Change order handlers, including the public decision endpoint hit from
//! the links emailed to the client.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::ChangeOrder;
use crate::services::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChangeOrderRequest {
    pub work_id: Uuid,
    pub description: Option<String>,
    #[serde(default)]
    pub total_cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChangeOrderRequest {
    pub description: Option<String>,
    pub total_cost: Option<Decimal>,
}

/// Query parameters carried by the emailed decision links.
#[derive(Debug, Deserialize)]
pub struct RespondParams {
    pub decision: String,
    pub token: String,
}

pub async fn create_change_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateChangeOrderRequest>,
) -> Result<(StatusCode, Json<ChangeOrder>), AppError> {
    let order = state
        .change_orders
        .create_change_order(payload.work_id, payload.description, payload.total_cost)
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_change_order(
    State(state): State<AppState>,
    Path(change_order_id): Path<Uuid>,
) -> Result<Json<ChangeOrder>, AppError> {
    let order = state
        .db
        .get_change_order(change_order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Change order not found")))?;

    Ok(Json(order))
}

pub async fn update_change_order(
    State(state): State<AppState>,
    Path(change_order_id): Path<Uuid>,
    Json(payload): Json<UpdateChangeOrderRequest>,
) -> Result<Json<ChangeOrder>, AppError> {
    let order = state
        .change_orders
        .update_change_order(change_order_id, payload.description, payload.total_cost)
        .await?;

    Ok(Json(order))
}

pub async fn send_change_order(
    State(state): State<AppState>,
    Path(change_order_id): Path<Uuid>,
) -> Result<Json<ChangeOrder>, AppError> {
    let order = state.change_orders.send(change_order_id).await?;

    Ok(Json(order))
}

/// Record the client's decision. Reached without authentication; the
/// single-use token in the link is the credential.
pub async fn respond_to_change_order(
    State(state): State<AppState>,
    Path(change_order_id): Path<Uuid>,
    Query(params): Query<RespondParams>,
) -> Result<Json<ChangeOrder>, AppError> {
    let order = state
        .change_orders
        .respond(change_order_id, &params.token, &params.decision)
        .await?;

    Ok(Json(order))
}
