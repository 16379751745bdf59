//! Final (settlement) invoice and its billable extras.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Final invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalInvoiceStatus {
    Pending,
    Paid,
    PartiallyPaid,
    Cancelled,
}

impl FinalInvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalInvoiceStatus::Pending => "pending",
            FinalInvoiceStatus::Paid => "paid",
            FinalInvoiceStatus::PartiallyPaid => "partially_paid",
            FinalInvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FinalInvoiceStatus::Pending),
            "paid" => Some(FinalInvoiceStatus::Paid),
            "partially_paid" => Some(FinalInvoiceStatus::PartiallyPaid),
            "cancelled" => Some(FinalInvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Paid states carry a payment date; every other state clears it.
    pub fn stamps_payment_date(&self) -> bool {
        matches!(
            self,
            FinalInvoiceStatus::Paid | FinalInvoiceStatus::PartiallyPaid
        )
    }
}

/// Settlement document for a work. `original_budget_total` and
/// `initial_payment_made` are snapshots taken at creation and never change;
/// the extras subtotal and amount due are running aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FinalInvoice {
    pub final_invoice_id: Uuid,
    pub work_id: Uuid,
    pub status: String,
    pub original_budget_total: Decimal,
    pub initial_payment_made: Decimal,
    pub subtotal_extras: Decimal,
    pub final_amount_due: Decimal,
    pub payment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub document_path: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Billable addition recorded against a final invoice after work starts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkExtraItem {
    pub extra_item_id: Uuid,
    pub final_invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Patch for an extra item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExtraItem {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

/// Amount still owed: original total plus approved extras, minus the deposit
/// already collected.
pub fn final_amount_due(
    original_budget_total: Decimal,
    subtotal_extras: Decimal,
    initial_payment_made: Decimal,
) -> Decimal {
    original_budget_total + subtotal_extras - initial_payment_made
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::budget::line_total;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_final_amount_due_scenario() {
        // originalBudgetTotal=1000, initialPaymentMade=600, extra qty=2 price=50.
        let extra = line_total(dec("2"), dec("50"));
        assert_eq!(extra, dec("100"));
        assert_eq!(final_amount_due(dec("1000"), extra, dec("600")), dec("500"));
    }

    #[test]
    fn test_add_then_remove_extra_round_trips() {
        let before = dec("250");
        let added = before + line_total(dec("3"), dec("40"));
        let after = added - line_total(dec("3"), dec("40"));
        assert_eq!(after, before);
        assert_eq!(
            final_amount_due(dec("1000"), after, dec("600")),
            final_amount_due(dec("1000"), before, dec("600"))
        );
    }

    #[test]
    fn test_status_payment_date_stamping() {
        assert!(FinalInvoiceStatus::Paid.stamps_payment_date());
        assert!(FinalInvoiceStatus::PartiallyPaid.stamps_payment_date());
        assert!(!FinalInvoiceStatus::Pending.stamps_payment_date());
        assert!(!FinalInvoiceStatus::Cancelled.stamps_payment_date());
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert_eq!(
            FinalInvoiceStatus::from_string("partially_paid"),
            Some(FinalInvoiceStatus::PartiallyPaid)
        );
        assert_eq!(FinalInvoiceStatus::from_string("refunded"), None);
    }
}
