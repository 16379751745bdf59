//! Budget lifecycle handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Budget, BudgetLineItem, CreateBudget, LineItemInput, UpdateBudget};
use crate::services::AppError;
use crate::AppState;

/// Request to create a budget for a permit.
#[derive(Debug, Deserialize)]
pub struct CreateBudgetRequest {
    pub permit_id: Uuid,
    pub budget_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub client_email: Option<String>,
    #[serde(default)]
    pub discount_amount: Decimal,
    pub discount_description: Option<String>,
    /// Either a number or the literal string "total". Accepted as any JSON
    /// scalar since clients send both forms.
    pub initial_payment_percentage: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub line_items: Vec<LineItemInput>,
}

/// Patch request for a budget. Omitted fields are left untouched;
/// `line_items`, when present, replaces the whole set.
#[derive(Debug, Deserialize)]
pub struct UpdateBudgetRequest {
    pub budget_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub client_email: Option<String>,
    pub discount_amount: Option<Decimal>,
    pub discount_description: Option<String>,
    pub initial_payment_percentage: Option<serde_json::Value>,
    pub payment_proof: Option<crate::models::PaymentProof>,
    pub notes: Option<String>,
    pub line_items: Option<Vec<LineItemInput>>,
}

#[derive(Debug, Serialize)]
pub struct BudgetResponse {
    #[serde(flatten)]
    pub budget: Budget,
    pub line_items: Vec<BudgetLineItem>,
}

/// Normalize the percentage field: numbers become their string form so the
/// domain parser sees one representation.
fn percentage_to_string(value: Option<serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(_) | None => None,
    }
}

pub async fn create_budget(
    State(state): State<AppState>,
    Json(payload): Json<CreateBudgetRequest>,
) -> Result<(StatusCode, Json<BudgetResponse>), AppError> {
    let input = CreateBudget {
        permit_id: payload.permit_id,
        budget_date: payload.budget_date,
        expiration_date: payload.expiration_date,
        client_email: payload.client_email,
        discount_amount: payload.discount_amount,
        discount_description: payload.discount_description,
        initial_payment_percentage: percentage_to_string(payload.initial_payment_percentage),
        notes: payload.notes,
        line_items: payload.line_items,
    };

    let (budget, line_items) = state.budgets.create_budget(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(BudgetResponse { budget, line_items }),
    ))
}

pub async fn get_budget(
    State(state): State<AppState>,
    Path(budget_id): Path<Uuid>,
) -> Result<Json<BudgetResponse>, AppError> {
    let budget = state
        .db
        .get_budget(budget_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Budget not found")))?;
    let line_items = state.db.get_budget_line_items(budget_id).await?;

    Ok(Json(BudgetResponse { budget, line_items }))
}

pub async fn update_budget(
    State(state): State<AppState>,
    Path(budget_id): Path<Uuid>,
    Json(payload): Json<UpdateBudgetRequest>,
) -> Result<Json<BudgetResponse>, AppError> {
    let patch = UpdateBudget {
        budget_date: payload.budget_date,
        expiration_date: payload.expiration_date,
        status: payload.status,
        client_email: payload.client_email,
        discount_amount: payload.discount_amount,
        discount_description: payload.discount_description,
        initial_payment_percentage: percentage_to_string(payload.initial_payment_percentage),
        payment_proof: payload.payment_proof,
        notes: payload.notes,
        line_items: payload.line_items,
    };

    let (budget, line_items) = state.budgets.update_budget(budget_id, patch).await?;

    Ok(Json(BudgetResponse { budget, line_items }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percentage_accepts_number_or_string() {
        assert_eq!(
            percentage_to_string(Some(json!("total"))),
            Some("total".to_string())
        );
        assert_eq!(
            percentage_to_string(Some(json!(45))),
            Some("45".to_string())
        );
        assert_eq!(
            percentage_to_string(Some(json!(12.5))),
            Some("12.5".to_string())
        );
        assert_eq!(percentage_to_string(Some(json!(null))), None);
        assert_eq!(percentage_to_string(None), None);
    }
}
