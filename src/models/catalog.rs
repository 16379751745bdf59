//! Price catalog entries snapshotted into budget line items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CatalogItem {
    pub catalog_item_id: Uuid,
    pub name: String,
    pub category: String,
    pub unit_price: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}
