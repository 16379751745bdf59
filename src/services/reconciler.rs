//! Payment gateway webhook reconciliation.
//!
//! Matches asynchronous gateway events to internal records exactly once.
//! Runs after the webhook has already been acknowledged, so every effect
//! here must be idempotent and every failure is terminal for the attempt:
//! logged, never surfaced to the gateway.

use crate::models::{BudgetStatus, FinalInvoice, FinalInvoiceStatus, IncomeCategory, Work, WorkStatus};
use crate::services::database::Database;
use crate::services::error::AppError;
use crate::services::gateway::{
    PaymentObject, WebhookEvent, EVENT_CHECKOUT_COMPLETED, EVENT_PAYMENT_FAILED,
    EVENT_PAYMENT_SUCCEEDED, META_BUDGET_ID, META_FINAL_INVOICE_ID, META_PURPOSE, META_WORK_ID,
    PURPOSE_FINAL_INVOICE_PAYMENT, PURPOSE_INVOICE_PAYMENT,
};
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Reconciliation decision derived from an event's kind and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    BudgetPayment {
        budget_id: Uuid,
    },
    FinalInvoicePayment {
        final_invoice_id: Uuid,
        work_id: Option<Uuid>,
    },
    PaymentFailed,
    Ignore,
}

/// Route an event by its kind and purpose tag. Unrecognized events and
/// malformed metadata are ignored, never errors: the gateway has already
/// been acknowledged.
pub fn route_event(event: &WebhookEvent) -> ReconcileAction {
    match event.event_type.as_str() {
        EVENT_CHECKOUT_COMPLETED | EVENT_PAYMENT_SUCCEEDED => {}
        EVENT_PAYMENT_FAILED => return ReconcileAction::PaymentFailed,
        _ => return ReconcileAction::Ignore,
    }

    let metadata = &event.data.object.metadata;
    match metadata.get(META_PURPOSE).map(String::as_str) {
        Some(PURPOSE_INVOICE_PAYMENT) => match metadata
            .get(META_BUDGET_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        {
            Some(budget_id) => ReconcileAction::BudgetPayment { budget_id },
            None => ReconcileAction::Ignore,
        },
        Some(PURPOSE_FINAL_INVOICE_PAYMENT) => match metadata
            .get(META_FINAL_INVOICE_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        {
            Some(final_invoice_id) => ReconcileAction::FinalInvoicePayment {
                final_invoice_id,
                work_id: metadata
                    .get(META_WORK_ID)
                    .and_then(|raw| Uuid::parse_str(raw).ok()),
            },
            None => ReconcileAction::Ignore,
        },
        _ => ReconcileAction::Ignore,
    }
}

/// Whether a gateway-reported amount, net of the processing fee, matches the
/// expected deposit within the $1 tolerance.
pub fn within_deposit_tolerance(
    amount_paid: Decimal,
    fee_rate: Decimal,
    expected: Decimal,
) -> bool {
    let paid_without_fee = amount_paid / (Decimal::ONE + fee_rate);
    (paid_without_fee - expected).abs() < Decimal::ONE
}

/// Convert a gateway minor-unit amount to a decimal currency amount.
pub fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

#[derive(Clone)]
pub struct WebhookReconciler {
    db: Database,
    fee_rate: Decimal,
}

impl WebhookReconciler {
    pub fn new(db: Database, fee_rate: Decimal) -> Self {
        Self { db, fee_rate }
    }

    /// Process an already-verified, already-acknowledged event.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: WebhookEvent) -> Result<(), AppError> {
        let outcome = match route_event(&event) {
            ReconcileAction::BudgetPayment { budget_id } => {
                self.reconcile_budget_payment(&event, budget_id).await?
            }
            ReconcileAction::FinalInvoicePayment {
                final_invoice_id,
                work_id,
            } => {
                self.reconcile_final_invoice_payment(&event, final_invoice_id, work_id)
                    .await?
            }
            ReconcileAction::PaymentFailed => {
                warn!(
                    session_id = %event.data.object.id,
                    "Gateway reported a failed payment; no state change"
                );
                "ignored"
            }
            ReconcileAction::Ignore => {
                info!("Ignoring unrecognized gateway event");
                "ignored"
            }
        };

        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event.event_type.as_str(), outcome])
            .inc();

        Ok(())
    }

    /// Record a budget-stage payment and mark the budget paid when the
    /// fee-adjusted amount matches the expected deposit. Income row and
    /// status flip commit together: a redelivery after a partial failure
    /// finds no income row and replays the whole branch.
    async fn reconcile_budget_payment(
        &self,
        event: &WebhookEvent,
        budget_id: Uuid,
    ) -> Result<&'static str, AppError> {
        let object = &event.data.object;

        if self.already_recorded(object).await? {
            return Ok("duplicate");
        }

        let budget = match self.db.get_budget(budget_id).await? {
            Some(b) => b,
            None => {
                warn!(budget_id = %budget_id, "Gateway event references unknown budget");
                return Ok("ignored");
            }
        };

        let amount = from_minor_units(object.amount_total.unwrap_or(0));
        let work = self.db.get_work_by_budget(budget_id).await?;

        let mut tx = self.db.pool().begin().await?;

        if !insert_income(
            &mut tx,
            object,
            work.as_ref().map(|w| w.work_id),
            Some(budget_id),
            amount,
            IncomeCategory::GatewayPayment,
        )
        .await?
        {
            tx.rollback().await?;
            return Ok("duplicate");
        }

        if within_deposit_tolerance(amount, self.fee_rate, budget.initial_payment) {
            sqlx::query("UPDATE budgets SET status = $2, updated_utc = NOW() WHERE budget_id = $1")
                .bind(budget_id)
                .bind(BudgetStatus::Paid.as_str())
                .execute(&mut *tx)
                .await?;
            info!(budget_id = %budget_id, amount = %amount, "Budget marked paid from gateway event");
        } else {
            warn!(
                budget_id = %budget_id,
                amount = %amount,
                expected = %budget.initial_payment,
                "Payment amount outside tolerance; income recorded, budget status unchanged"
            );
        }

        tx.commit().await?;

        Ok("processed")
    }

    /// Record a final-invoice settlement and advance the invoice and work,
    /// all in one transaction keyed by the income correlation ids.
    async fn reconcile_final_invoice_payment(
        &self,
        event: &WebhookEvent,
        final_invoice_id: Uuid,
        work_id: Option<Uuid>,
    ) -> Result<&'static str, AppError> {
        let object = &event.data.object;

        if self.already_recorded(object).await? {
            return Ok("duplicate");
        }

        let invoice = match self.db.get_final_invoice(final_invoice_id).await? {
            Some(inv) => inv,
            None => {
                warn!(
                    final_invoice_id = %final_invoice_id,
                    "Gateway event references unknown final invoice"
                );
                return Ok("ignored");
            }
        };

        let amount = from_minor_units(object.amount_total.unwrap_or(0));

        // Metadata can name a stale or foreign work id; resolve it before it
        // reaches the income's foreign key. The invoice's own work always
        // exists.
        let metadata_work = match work_id {
            Some(id) => self.db.get_work(id).await?,
            None => None,
        };
        let work_id = effective_work_id(metadata_work.as_ref(), &invoice);

        let mut tx = self.db.pool().begin().await?;

        if !insert_income(
            &mut tx,
            object,
            Some(work_id),
            None,
            amount,
            IncomeCategory::FinalPayment,
        )
        .await?
        {
            tx.rollback().await?;
            return Ok("duplicate");
        }

        sqlx::query(
            r#"
            UPDATE final_invoices
            SET status = $2, payment_date = NOW(), updated_utc = NOW()
            WHERE final_invoice_id = $1
            "#,
        )
        .bind(final_invoice_id)
        .bind(FinalInvoiceStatus::Paid.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE works SET status = $2, updated_utc = NOW() WHERE work_id = $1")
            .bind(work_id)
            .bind(WorkStatus::PaymentReceived.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            final_invoice_id = %final_invoice_id,
            amount = %amount,
            "Final invoice settled from gateway event"
        );

        Ok("processed")
    }

    /// Gateway retries redeliver the same correlation ids; once an income row
    /// carries them, the event has already been booked.
    async fn already_recorded(&self, object: &PaymentObject) -> Result<bool, AppError> {
        let existing = self
            .db
            .find_income_by_correlation(Some(&object.id), object.payment_intent.as_deref())
            .await?;

        if let Some(income) = existing {
            info!(
                income_id = %income.income_id,
                session_id = %object.id,
                "Duplicate gateway delivery; already reconciled"
            );
            return Ok(true);
        }
        Ok(false)
    }
}

/// The work an income row and status update should reference: the validated
/// metadata work when it resolves, otherwise the invoice's own work.
fn effective_work_id(metadata_work: Option<&Work>, invoice: &FinalInvoice) -> Uuid {
    metadata_work
        .map(|w| w.work_id)
        .unwrap_or(invoice.work_id)
}

/// Insert the income row inside the caller's transaction. Returns false when
/// a concurrent delivery already holds the correlation id; the caller must
/// roll back, since the violation has aborted the transaction.
async fn insert_income(
    tx: &mut Transaction<'_, Postgres>,
    object: &PaymentObject,
    work_id: Option<Uuid>,
    budget_id: Option<Uuid>,
    amount: Decimal,
    category: IncomeCategory,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO incomes (
            income_id, work_id, budget_id, amount, category,
            gateway_session_id, gateway_payment_intent_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(work_id)
    .bind(budget_id)
    .bind(amount)
    .bind(category.as_str())
    .bind(&object.id)
    .bind(&object.payment_intent)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
            info!(session_id = %object.id, "Income already recorded by concurrent delivery");
            Ok(false)
        }
        Err(e) => Err(AppError::DatabaseError(anyhow::anyhow!(
            "Failed to record income: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{PaymentObject, WebhookEventData};
    use std::collections::HashMap;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn event(event_type: &str, metadata: HashMap<String, String>) -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            event_type: event_type.to_string(),
            data: WebhookEventData {
                object: PaymentObject {
                    id: "cs_1".to_string(),
                    payment_intent: Some("pi_1".to_string()),
                    amount_total: Some(20600),
                    customer_email: None,
                    metadata,
                },
            },
        }
    }

    #[test]
    fn test_fee_adjusted_amount_within_tolerance() {
        // amount_total $206.00, fee 3%, expected deposit $200.00.
        let amount = from_minor_units(20600);
        assert_eq!(amount, dec("206.00"));
        assert!(within_deposit_tolerance(amount, dec("0.03"), dec("200.00")));
    }

    #[test]
    fn test_tolerance_boundary() {
        // Exactly $1.01 off after fee adjustment is outside; $0.99 is inside.
        assert!(!within_deposit_tolerance(dec("201.01"), Decimal::ZERO, dec("200.00")));
        assert!(within_deposit_tolerance(dec("200.99"), Decimal::ZERO, dec("200.00")));
        // Exactly $1.00 off is outside (strict comparison).
        assert!(!within_deposit_tolerance(dec("201.00"), Decimal::ZERO, dec("200.00")));
    }

    #[test]
    fn test_route_budget_payment() {
        let mut metadata = HashMap::new();
        let budget_id = Uuid::new_v4();
        metadata.insert("purpose".to_string(), "invoice_payment".to_string());
        metadata.insert("budget_id".to_string(), budget_id.to_string());

        assert_eq!(
            route_event(&event(EVENT_CHECKOUT_COMPLETED, metadata)),
            ReconcileAction::BudgetPayment { budget_id }
        );
    }

    #[test]
    fn test_route_final_invoice_payment_with_optional_work() {
        let invoice_id = Uuid::new_v4();
        let work_id = Uuid::new_v4();

        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), "final_invoice_payment".to_string());
        metadata.insert("final_invoice_id".to_string(), invoice_id.to_string());
        assert_eq!(
            route_event(&event(EVENT_PAYMENT_SUCCEEDED, metadata.clone())),
            ReconcileAction::FinalInvoicePayment {
                final_invoice_id: invoice_id,
                work_id: None
            }
        );

        metadata.insert("work_id".to_string(), work_id.to_string());
        assert_eq!(
            route_event(&event(EVENT_PAYMENT_SUCCEEDED, metadata)),
            ReconcileAction::FinalInvoicePayment {
                final_invoice_id: invoice_id,
                work_id: Some(work_id)
            }
        );
    }

    #[test]
    fn test_route_ignores_unknown_events_and_purposes() {
        assert_eq!(
            route_event(&event("charge.refunded", HashMap::new())),
            ReconcileAction::Ignore
        );

        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), "gift_card".to_string());
        assert_eq!(
            route_event(&event(EVENT_CHECKOUT_COMPLETED, metadata)),
            ReconcileAction::Ignore
        );

        // Purpose present but the id is malformed.
        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), "invoice_payment".to_string());
        metadata.insert("budget_id".to_string(), "not-a-uuid".to_string());
        assert_eq!(
            route_event(&event(EVENT_CHECKOUT_COMPLETED, metadata)),
            ReconcileAction::Ignore
        );
    }

    #[test]
    fn test_effective_work_falls_back_to_invoice() {
        let invoice_work = Uuid::new_v4();
        let metadata_work = Uuid::new_v4();
        let invoice = sample_invoice(invoice_work);

        // Metadata named no work, or a work that did not resolve.
        assert_eq!(effective_work_id(None, &invoice), invoice_work);

        let work = sample_work(metadata_work);
        assert_eq!(effective_work_id(Some(&work), &invoice), metadata_work);
    }

    fn sample_invoice(work_id: Uuid) -> FinalInvoice {
        FinalInvoice {
            final_invoice_id: Uuid::new_v4(),
            work_id,
            status: "pending".to_string(),
            original_budget_total: dec("1000"),
            initial_payment_made: dec("600"),
            subtotal_extras: Decimal::ZERO,
            final_amount_due: dec("400"),
            payment_date: None,
            notes: None,
            document_path: None,
            created_utc: chrono::Utc::now(),
            updated_utc: chrono::Utc::now(),
        }
    }

    fn sample_work(work_id: Uuid) -> Work {
        Work {
            work_id,
            budget_id: Uuid::new_v4(),
            status: WorkStatus::Pending.as_str().to_string(),
            initial_payment: dec("600"),
            created_utc: chrono::Utc::now(),
            updated_utc: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_route_failed_payment() {
        assert_eq!(
            route_event(&event(EVENT_PAYMENT_FAILED, HashMap::new())),
            ReconcileAction::PaymentFailed
        );
    }
}
