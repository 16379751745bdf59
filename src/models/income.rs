//! Income ledger rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Classification tag on an income row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeCategory {
    /// Deposit booked when a budget is approved.
    InitialDeposit,
    /// Gateway-reported payment against a budget.
    GatewayPayment,
    /// Gateway-reported settlement of a final invoice.
    FinalPayment,
    Other,
}

impl IncomeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeCategory::InitialDeposit => "initial_deposit",
            IncomeCategory::GatewayPayment => "gateway_payment",
            IncomeCategory::FinalPayment => "final_payment",
            IncomeCategory::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "initial_deposit" => IncomeCategory::InitialDeposit,
            "gateway_payment" => IncomeCategory::GatewayPayment,
            "final_payment" => IncomeCategory::FinalPayment,
            _ => IncomeCategory::Other,
        }
    }
}

/// Append-style ledger row. Budget-stage payments precede Work existence, so
/// the work reference is optional. Gateway correlation ids are the natural
/// idempotency key for webhook-sourced rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Income {
    pub income_id: Uuid,
    pub work_id: Option<Uuid>,
    pub budget_id: Option<Uuid>,
    pub amount: Decimal,
    pub category: String,
    pub gateway_session_id: Option<String>,
    pub gateway_payment_intent_id: Option<String>,
    pub notes: Option<String>,
    pub received_utc: DateTime<Utc>,
}
