//! Final invoice extras ledger.
//!
//! Maintains the running extras subtotal and amount due on settlement
//! documents. Aggregates are recomputed from the child rows inside each
//! mutating transaction rather than patched by delta, so concurrent writers
//! converge on the sum of what actually exists.

use crate::models::budget::line_total;
use crate::models::final_invoice::final_amount_due;
use crate::models::{
    BudgetStatus, FinalInvoice, FinalInvoiceStatus, UpdateExtraItem, WorkExtraItem,
};
use crate::services::database::Database;
use crate::services::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "final_invoice_id, work_id, status, original_budget_total, \
     initial_payment_made, subtotal_extras, final_amount_due, payment_date, notes, \
     document_path, created_utc, updated_utc";

const EXTRA_COLUMNS: &str =
    "extra_item_id, final_invoice_id, description, quantity, unit_price, line_total, created_utc";

#[derive(Clone)]
pub struct FinalInvoiceService {
    db: Database,
}

impl FinalInvoiceService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the settlement invoice for a work, snapshotting the original
    /// budget total and the deposit actually collected. One per work.
    #[instrument(skip(self), fields(work_id = %work_id))]
    pub async fn create_final_invoice(&self, work_id: Uuid) -> Result<FinalInvoice, AppError> {
        let work = self
            .db
            .get_work(work_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Work not found")))?;

        let budget = self
            .db
            .get_budget(work.budget_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Budget not found for work")))?;

        let budget_status = BudgetStatus::from_string(&budget.status);
        if !matches!(
            budget_status,
            Some(BudgetStatus::Approved | BudgetStatus::Paid)
        ) {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Cannot create a final invoice for a work whose budget is not approved"
            )));
        }

        let initial_payment_made = budget.authoritative_deposit();
        let amount_due = final_amount_due(budget.total_price, Decimal::ZERO, initial_payment_made);

        let invoice = sqlx::query_as::<_, FinalInvoice>(&format!(
            r#"
            INSERT INTO final_invoices (
                final_invoice_id, work_id, status, original_budget_total,
                initial_payment_made, subtotal_extras, final_amount_due
            )
            VALUES ($1, $2, 'pending', $3, $4, 0, $5)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(work_id)
        .bind(budget.total_price)
        .bind(initial_payment_made)
        .bind(amount_due)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::StateConflict(anyhow::anyhow!(
                    "A final invoice already exists for this work"
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create final invoice: {}", e)),
        })?;

        info!(
            final_invoice_id = %invoice.final_invoice_id,
            amount_due = %invoice.final_amount_due,
            "Final invoice created"
        );

        Ok(invoice)
    }

    /// Add a billable extra and bring the parent aggregates up to date, all
    /// inside one transaction.
    #[instrument(skip(self), fields(final_invoice_id = %final_invoice_id))]
    pub async fn add_extra_item(
        &self,
        final_invoice_id: Uuid,
        description: &str,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<(FinalInvoice, WorkExtraItem), AppError> {
        validate_extra(description, quantity, unit_price)?;

        let mut tx = self.db.pool().begin().await?;
        lock_invoice(&mut tx, final_invoice_id).await?;

        let item = sqlx::query_as::<_, WorkExtraItem>(&format!(
            r#"
            INSERT INTO work_extra_items (
                extra_item_id, final_invoice_id, description, quantity, unit_price, line_total
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {EXTRA_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(final_invoice_id)
        .bind(description)
        .bind(quantity)
        .bind(unit_price)
        .bind(line_total(quantity, unit_price))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to add extra item: {}", e)))?;

        let invoice = resum_aggregates(&mut tx, final_invoice_id).await?;
        tx.commit().await?;

        info!(
            extra_item_id = %item.extra_item_id,
            line_total = %item.line_total,
            amount_due = %invoice.final_amount_due,
            "Extra item added"
        );

        Ok((invoice, item))
    }

    /// Update an extra item and resum the parent aggregates.
    #[instrument(skip(self, patch), fields(extra_item_id = %extra_item_id))]
    pub async fn update_extra_item(
        &self,
        extra_item_id: Uuid,
        patch: UpdateExtraItem,
    ) -> Result<(FinalInvoice, WorkExtraItem), AppError> {
        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query_as::<_, WorkExtraItem>(&format!(
            "SELECT {EXTRA_COLUMNS} FROM work_extra_items WHERE extra_item_id = $1 FOR UPDATE"
        ))
        .bind(extra_item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Extra item not found")))?;

        lock_invoice(&mut tx, existing.final_invoice_id).await?;

        let description = patch
            .description
            .unwrap_or_else(|| existing.description.clone());
        let quantity = patch.quantity.unwrap_or(existing.quantity);
        let unit_price = patch.unit_price.unwrap_or(existing.unit_price);
        validate_extra(&description, quantity, unit_price)?;

        let item = sqlx::query_as::<_, WorkExtraItem>(&format!(
            r#"
            UPDATE work_extra_items
            SET description = $2, quantity = $3, unit_price = $4, line_total = $5
            WHERE extra_item_id = $1
            RETURNING {EXTRA_COLUMNS}
            "#
        ))
        .bind(extra_item_id)
        .bind(&description)
        .bind(quantity)
        .bind(unit_price)
        .bind(line_total(quantity, unit_price))
        .fetch_one(&mut *tx)
        .await?;

        let invoice = resum_aggregates(&mut tx, existing.final_invoice_id).await?;
        tx.commit().await?;

        info!(
            extra_item_id = %extra_item_id,
            amount_due = %invoice.final_amount_due,
            "Extra item updated"
        );

        Ok((invoice, item))
    }

    /// Remove an extra item and resum the parent aggregates.
    #[instrument(skip(self), fields(extra_item_id = %extra_item_id))]
    pub async fn remove_extra_item(&self, extra_item_id: Uuid) -> Result<FinalInvoice, AppError> {
        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query_as::<_, WorkExtraItem>(&format!(
            "SELECT {EXTRA_COLUMNS} FROM work_extra_items WHERE extra_item_id = $1 FOR UPDATE"
        ))
        .bind(extra_item_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Extra item not found")))?;

        lock_invoice(&mut tx, existing.final_invoice_id).await?;

        sqlx::query("DELETE FROM work_extra_items WHERE extra_item_id = $1")
            .bind(extra_item_id)
            .execute(&mut *tx)
            .await?;

        let invoice = resum_aggregates(&mut tx, existing.final_invoice_id).await?;
        tx.commit().await?;

        info!(
            extra_item_id = %extra_item_id,
            amount_due = %invoice.final_amount_due,
            "Extra item removed"
        );

        Ok(invoice)
    }

    /// Update the invoice status. Paid states stamp the payment date (given
    /// value or now); any other status clears it.
    #[instrument(skip(self), fields(final_invoice_id = %final_invoice_id))]
    pub async fn update_status(
        &self,
        final_invoice_id: Uuid,
        status: &str,
        payment_date: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<FinalInvoice, AppError> {
        let status = FinalInvoiceStatus::from_string(status).ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!("Unknown final invoice status: {}", status))
        })?;

        let effective_date = if status.stamps_payment_date() {
            Some(payment_date.unwrap_or_else(Utc::now))
        } else {
            None
        };

        let invoice = sqlx::query_as::<_, FinalInvoice>(&format!(
            r#"
            UPDATE final_invoices
            SET status = $2, payment_date = $3, notes = COALESCE($4, notes), updated_utc = NOW()
            WHERE final_invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(final_invoice_id)
        .bind(status.as_str())
        .bind(effective_date)
        .bind(notes)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Final invoice not found")))?;

        info!(
            final_invoice_id = %final_invoice_id,
            status = %invoice.status,
            "Final invoice status updated"
        );

        Ok(invoice)
    }
}

fn validate_extra(
    description: &str,
    quantity: Decimal,
    unit_price: Decimal,
) -> Result<(), AppError> {
    if description.trim().is_empty() {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "Extra item description is required"
        )));
    }
    if quantity <= Decimal::ZERO {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "Extra item quantity must be positive"
        )));
    }
    if unit_price < Decimal::ZERO {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "Extra item unit price cannot be negative"
        )));
    }
    Ok(())
}

/// Lock the parent invoice row for the duration of the transaction.
async fn lock_invoice(
    tx: &mut Transaction<'_, Postgres>,
    final_invoice_id: Uuid,
) -> Result<(), AppError> {
    let locked = sqlx::query_scalar::<_, Uuid>(
        "SELECT final_invoice_id FROM final_invoices WHERE final_invoice_id = $1 FOR UPDATE",
    )
    .bind(final_invoice_id)
    .fetch_optional(&mut **tx)
    .await?;

    if locked.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Final invoice not found"
        )));
    }
    Ok(())
}

/// Recompute `subtotal_extras` from the child rows and rederive
/// `final_amount_due` from the immutable snapshots.
async fn resum_aggregates(
    tx: &mut Transaction<'_, Postgres>,
    final_invoice_id: Uuid,
) -> Result<FinalInvoice, AppError> {
    let invoice = sqlx::query_as::<_, FinalInvoice>(&format!(
        r#"
        UPDATE final_invoices
        SET subtotal_extras = agg.extras,
            final_amount_due = original_budget_total + agg.extras - initial_payment_made,
            updated_utc = NOW()
        FROM (
            SELECT COALESCE(SUM(line_total), 0) AS extras
            FROM work_extra_items
            WHERE final_invoice_id = $1
        ) AS agg
        WHERE final_invoice_id = $1
        RETURNING {INVOICE_COLUMNS}
        "#
    ))
    .bind(final_invoice_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to recompute aggregates: {}", e))
    })?;

    Ok(invoice)
}
