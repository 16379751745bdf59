//! Operational job record, created once a budget is approved.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Work status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InProgress,
    PaymentReceived,
    Completed,
    Cancelled,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::PaymentReceived => "payment_received",
            WorkStatus::Completed => "completed",
            WorkStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "in_progress" => WorkStatus::InProgress,
            "payment_received" => WorkStatus::PaymentReceived,
            "completed" => WorkStatus::Completed,
            "cancelled" => WorkStatus::Cancelled,
            _ => WorkStatus::Pending,
        }
    }
}

/// One Work per approved Budget; `initial_payment` is the deposit actually
/// collected, which may differ from the budget's computed figure.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Work {
    pub work_id: Uuid,
    pub budget_id: Uuid,
    pub status: String,
    pub initial_payment: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}
