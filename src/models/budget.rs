//! Budget (quote) model and totals arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Deposit percentage applied when the operator supplies none.
pub const DEFAULT_DEPOSIT_PERCENTAGE: u32 = 60;

/// Budget status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Pending,
    Sent,
    Approved,
    Rejected,
    Paid,
    Expired,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetStatus::Pending => "pending",
            BudgetStatus::Sent => "sent",
            BudgetStatus::Approved => "approved",
            BudgetStatus::Rejected => "rejected",
            BudgetStatus::Paid => "paid",
            BudgetStatus::Expired => "expired",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BudgetStatus::Pending),
            "sent" => Some(BudgetStatus::Sent),
            "approved" => Some(BudgetStatus::Approved),
            "rejected" => Some(BudgetStatus::Rejected),
            "paid" => Some(BudgetStatus::Paid),
            "expired" => Some(BudgetStatus::Expired),
            _ => None,
        }
    }
}

/// Budget (client-facing quote).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Budget {
    pub budget_id: Uuid,
    pub permit_id: Uuid,
    pub budget_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub status: String,
    pub client_email: Option<String>,
    pub discount_amount: Decimal,
    pub discount_description: Option<String>,
    pub subtotal_price: Decimal,
    pub total_price: Decimal,
    pub initial_payment_percentage: Decimal,
    pub initial_payment: Decimal,
    pub payment_proof_url: Option<String>,
    pub payment_proof_type: Option<String>,
    pub payment_proof_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub document_path: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Budget {
    /// The deposit amount that downstream records must book: an
    /// operator-entered proof amount overrides the computed one.
    pub fn authoritative_deposit(&self) -> Decimal {
        self.payment_proof_amount.unwrap_or(self.initial_payment)
    }

    pub fn has_payment_proof(&self) -> bool {
        self.payment_proof_url.is_some()
    }
}

/// Priced line on a budget. Catalog-sourced items keep the catalog reference;
/// the unit price is a snapshot taken at creation time either way.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BudgetLineItem {
    pub line_item_id: Uuid,
    pub budget_id: Uuid,
    pub catalog_item_id: Option<Uuid>,
    pub name: String,
    pub category: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Line item input, one validator per variant. Catalog items resolve their
/// price from the price list; manual items must supply the full triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LineItemInput {
    Catalog {
        catalog_item_id: Uuid,
        quantity: Decimal,
    },
    Manual {
        name: String,
        category: String,
        quantity: Decimal,
        unit_price: Decimal,
    },
}

impl LineItemInput {
    pub fn quantity(&self) -> Decimal {
        match self {
            LineItemInput::Catalog { quantity, .. } => *quantity,
            LineItemInput::Manual { quantity, .. } => *quantity,
        }
    }
}

/// Input for creating a budget.
#[derive(Debug, Clone)]
pub struct CreateBudget {
    pub permit_id: Uuid,
    pub budget_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub client_email: Option<String>,
    pub discount_amount: Decimal,
    pub discount_description: Option<String>,
    pub initial_payment_percentage: Option<String>,
    pub notes: Option<String>,
    pub line_items: Vec<LineItemInput>,
}

/// Payment proof attached by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub url: String,
    pub proof_type: Option<String>,
    pub amount: Option<Decimal>,
}

/// Patch for updating a budget. `line_items: Some(_)` replaces the whole set.
#[derive(Debug, Clone, Default)]
pub struct UpdateBudget {
    pub budget_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub client_email: Option<String>,
    pub discount_amount: Option<Decimal>,
    pub discount_description: Option<String>,
    pub initial_payment_percentage: Option<String>,
    pub payment_proof: Option<PaymentProof>,
    pub notes: Option<String>,
    pub line_items: Option<Vec<LineItemInput>>,
}

impl UpdateBudget {
    /// True when free-text notes is the only field being touched, in which
    /// case the document is not re-rendered.
    pub fn is_notes_only(&self) -> bool {
        self.notes.is_some()
            && self.budget_date.is_none()
            && self.expiration_date.is_none()
            && self.status.is_none()
            && self.client_email.is_none()
            && self.discount_amount.is_none()
            && self.discount_description.is_none()
            && self.initial_payment_percentage.is_none()
            && self.payment_proof.is_none()
            && self.line_items.is_none()
    }
}

/// Resolve the deposit percentage input: the literal token "total" means the
/// full amount is due up front; anything unparseable falls back to the
/// default.
pub fn parse_deposit_percentage(input: Option<&str>) -> Decimal {
    match input {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.eq_ignore_ascii_case("total") {
                Decimal::from(100u32)
            } else {
                trimmed
                    .parse::<Decimal>()
                    .unwrap_or_else(|_| Decimal::from(DEFAULT_DEPOSIT_PERCENTAGE))
            }
        }
        None => Decimal::from(DEFAULT_DEPOSIT_PERCENTAGE),
    }
}

pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Decimal {
    (quantity * unit_price).round_dp(2)
}

pub fn total_price(subtotal: Decimal, discount: Decimal) -> Decimal {
    subtotal - discount
}

pub fn initial_payment(total: Decimal, percentage: Decimal) -> Decimal {
    (total * percentage / Decimal::from(100u32)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert_eq!(
            BudgetStatus::from_string("approved"),
            Some(BudgetStatus::Approved)
        );
        // A typo must surface as an error upstream, never demote to pending.
        assert_eq!(BudgetStatus::from_string("aproved"), None);
        assert_eq!(BudgetStatus::from_string(""), None);
    }

    #[test]
    fn test_deposit_percentage_total_token() {
        assert_eq!(parse_deposit_percentage(Some("total")), dec("100"));
        assert_eq!(parse_deposit_percentage(Some(" Total ")), dec("100"));
    }

    #[test]
    fn test_deposit_percentage_numeric() {
        assert_eq!(parse_deposit_percentage(Some("45")), dec("45"));
        assert_eq!(parse_deposit_percentage(Some("12.5")), dec("12.5"));
    }

    #[test]
    fn test_deposit_percentage_fallback() {
        assert_eq!(parse_deposit_percentage(Some("half")), dec("60"));
        assert_eq!(parse_deposit_percentage(Some("")), dec("60"));
        assert_eq!(parse_deposit_percentage(None), dec("60"));
    }

    #[test]
    fn test_budget_totals_scenario() {
        // $100 x 2 + $50 x 1, discount $25, percentage 60.
        let subtotal = line_total(dec("2"), dec("100")) + line_total(dec("1"), dec("50"));
        assert_eq!(subtotal, dec("250"));

        let total = total_price(subtotal, dec("25"));
        assert_eq!(total, dec("225"));

        let deposit = initial_payment(total, parse_deposit_percentage(Some("60")));
        assert_eq!(deposit, dec("135"));
    }

    #[test]
    fn test_budget_totals_full_deposit() {
        let total = total_price(dec("250"), dec("25"));
        let deposit = initial_payment(total, parse_deposit_percentage(Some("total")));
        assert_eq!(deposit, dec("225"));
    }

    #[test]
    fn test_authoritative_deposit_prefers_proof_amount() {
        let mut budget = sample_budget();
        budget.initial_payment = dec("135");
        assert_eq!(budget.authoritative_deposit(), dec("135"));

        budget.payment_proof_amount = Some(dec("150"));
        assert_eq!(budget.authoritative_deposit(), dec("150"));
    }

    #[test]
    fn test_notes_only_patch() {
        let patch = UpdateBudget {
            notes: Some("call client before starting".to_string()),
            ..Default::default()
        };
        assert!(patch.is_notes_only());

        let patch = UpdateBudget {
            notes: Some("note".to_string()),
            discount_amount: Some(dec("10")),
            ..Default::default()
        };
        assert!(!patch.is_notes_only());

        assert!(!UpdateBudget::default().is_notes_only());
    }

    fn sample_budget() -> Budget {
        Budget {
            budget_id: Uuid::new_v4(),
            permit_id: Uuid::new_v4(),
            budget_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            expiration_date: None,
            status: "pending".to_string(),
            client_email: None,
            discount_amount: Decimal::ZERO,
            discount_description: None,
            subtotal_price: Decimal::ZERO,
            total_price: Decimal::ZERO,
            initial_payment_percentage: dec("60"),
            initial_payment: Decimal::ZERO,
            payment_proof_url: None,
            payment_proof_type: None,
            payment_proof_amount: None,
            notes: None,
            document_path: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }
}
