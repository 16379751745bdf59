//! Permit reference data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Construction permit a budget is quoted against. The applicant email is the
/// fallback contact when a budget carries no client email of its own.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permit {
    pub permit_id: Uuid,
    pub permit_number: String,
    pub applicant_name: String,
    pub applicant_email: Option<String>,
    pub property_address: Option<String>,
    pub created_utc: DateTime<Utc>,
}
