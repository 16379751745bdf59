//! Budget lifecycle management.
//!
//! Creates and updates quotes, recomputes their totals, gates status
//! transitions, and materializes the operational Work plus its deposit
//! Income row when a budget is approved.

use crate::models::budget::{
    initial_payment, line_total, parse_deposit_percentage, total_price,
};
use crate::models::{
    Budget, BudgetLineItem, BudgetStatus, CreateBudget, Income, IncomeCategory, LineItemInput,
    UpdateBudget, Work, WorkStatus,
};
use crate::services::database::Database;
use crate::services::documents::{DocumentClient, DocumentKind, RenderLine, RenderRequest};
use crate::services::error::AppError;
use crate::services::gateway::{
    GatewayClient, META_BUDGET_ID, META_PURPOSE, PURPOSE_INVOICE_PAYMENT,
};
use crate::services::metrics::BUDGETS_TOTAL;
use crate::services::notifications::Notifier;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const BUDGET_COLUMNS: &str = "budget_id, permit_id, budget_date, expiration_date, status, \
     client_email, discount_amount, discount_description, subtotal_price, total_price, \
     initial_payment_percentage, initial_payment, payment_proof_url, payment_proof_type, \
     payment_proof_amount, notes, document_path, created_utc, updated_utc";

/// A line item input resolved to concrete values (catalog price snapshotted).
#[derive(Debug, Clone)]
struct ResolvedLine {
    catalog_item_id: Option<Uuid>,
    name: String,
    category: String,
    quantity: Decimal,
    unit_price: Decimal,
    line_total: Decimal,
}

#[derive(Clone)]
pub struct BudgetService {
    db: Database,
    documents: DocumentClient,
    gateway: GatewayClient,
    notifier: Notifier,
}

impl BudgetService {
    pub fn new(
        db: Database,
        documents: DocumentClient,
        gateway: GatewayClient,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            documents,
            gateway,
            notifier,
        }
    }

    /// Create a budget with its line items in one transaction. The document
    /// render runs after commit and is best-effort: a failed render leaves
    /// the committed budget without a document, to be regenerated on the next
    /// update.
    #[instrument(skip(self, input), fields(permit_id = %input.permit_id))]
    pub async fn create_budget(
        &self,
        input: CreateBudget,
    ) -> Result<(Budget, Vec<BudgetLineItem>), AppError> {
        let permit = self
            .db
            .get_permit(input.permit_id)
            .await?
            .ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!("Permit not found"))
            })?;

        if input.discount_amount < Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Discount amount cannot be negative"
            )));
        }

        let resolved = self.resolve_line_items(&input.line_items).await?;
        let subtotal: Decimal = resolved.iter().map(|l| l.line_total).sum();
        let percentage = parse_deposit_percentage(input.initial_payment_percentage.as_deref());
        let total = total_price(subtotal, input.discount_amount);
        let deposit = initial_payment(total, percentage);

        let mut tx = self.db.pool().begin().await?;

        let budget_id = Uuid::new_v4();
        let budget = sqlx::query_as::<_, Budget>(&format!(
            r#"
            INSERT INTO budgets (
                budget_id, permit_id, budget_date, expiration_date, status, client_email,
                discount_amount, discount_description, subtotal_price, total_price,
                initial_payment_percentage, initial_payment, notes
            )
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {BUDGET_COLUMNS}
            "#
        ))
        .bind(budget_id)
        .bind(input.permit_id)
        .bind(input.budget_date)
        .bind(input.expiration_date)
        .bind(&input.client_email)
        .bind(input.discount_amount)
        .bind(&input.discount_description)
        .bind(subtotal)
        .bind(total)
        .bind(percentage)
        .bind(deposit)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create budget: {}", e)))?;

        let items = insert_line_items(&mut tx, budget_id, &resolved).await?;

        tx.commit().await?;

        BUDGETS_TOTAL.with_label_values(&["pending"]).inc();
        info!(budget_id = %budget.budget_id, total = %budget.total_price, "Budget created");

        // Post-commit best-effort render. Failure is logged, never bubbled:
        // the financial record is already durable.
        let service = self.clone();
        let render_budget = budget.clone();
        let render_items = items.clone();
        let recipient_name = permit.applicant_name.clone();
        tokio::spawn(async move {
            match service
                .render_budget_document(&render_budget, &render_items, Some(recipient_name))
                .await
            {
                Ok(path) => {
                    if let Err(e) = service
                        .db
                        .set_budget_document_path(render_budget.budget_id, &path)
                        .await
                    {
                        warn!(budget_id = %render_budget.budget_id, error = %e, "Failed to store document path");
                    }
                }
                Err(e) => {
                    warn!(
                        budget_id = %render_budget.budget_id,
                        error = %e,
                        "Budget document render failed; budget committed without document"
                    );
                }
            }
        });

        Ok((budget, items))
    }

    /// Update a budget inside one transaction. A supplied `line_items` set
    /// replaces the existing one wholesale; totals are always recomputed from
    /// the effective set. The document re-render happens inside the
    /// transaction and aborts it on failure, unlike creation where the render
    /// is post-commit best-effort. That asymmetry is inherited behavior and
    /// is kept deliberately.
    #[instrument(skip(self, patch), fields(budget_id = %budget_id))]
    pub async fn update_budget(
        &self,
        budget_id: Uuid,
        patch: UpdateBudget,
    ) -> Result<(Budget, Vec<BudgetLineItem>), AppError> {
        let mut tx = self.db.pool().begin().await?;

        let existing = sqlx::query_as::<_, Budget>(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets WHERE budget_id = $1 FOR UPDATE"
        ))
        .bind(budget_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Budget not found")))?;

        let was_approved =
            BudgetStatus::from_string(&existing.status) == Some(BudgetStatus::Approved);
        // A misspelled status in a patch is a client error, not a demotion to
        // pending.
        let new_status = match patch.status.as_deref() {
            Some(raw) => BudgetStatus::from_string(raw).ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!("Unknown budget status: {}", raw))
            })?,
            None => BudgetStatus::from_string(&existing.status).unwrap_or(BudgetStatus::Pending),
        };

        // Approval requires an attached payment proof.
        if new_status == BudgetStatus::Approved
            && patch.payment_proof.is_none()
            && existing.payment_proof_url.is_none()
        {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Budget cannot be approved without a payment proof"
            )));
        }

        // Replace-all line item semantics: the incoming set supersedes the
        // stored one entirely; no per-item diffing.
        let items = match &patch.line_items {
            Some(inputs) => {
                sqlx::query("DELETE FROM budget_line_items WHERE budget_id = $1")
                    .bind(budget_id)
                    .execute(&mut *tx)
                    .await?;
                let resolved = self.resolve_line_items(inputs).await?;
                insert_line_items(&mut tx, budget_id, &resolved).await?
            }
            None => {
                sqlx::query_as::<_, BudgetLineItem>(
                    r#"
                    SELECT line_item_id, budget_id, catalog_item_id, name, category, quantity,
                        unit_price, line_total, created_utc
                    FROM budget_line_items
                    WHERE budget_id = $1
                    ORDER BY created_utc
                    "#,
                )
                .bind(budget_id)
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let subtotal: Decimal = items.iter().map(|i| i.line_total).sum();
        let discount = patch.discount_amount.unwrap_or(existing.discount_amount);
        if discount < Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Discount amount cannot be negative"
            )));
        }
        let percentage = match patch.initial_payment_percentage.as_deref() {
            Some(raw) => parse_deposit_percentage(Some(raw)),
            None => existing.initial_payment_percentage,
        };
        let total = total_price(subtotal, discount);
        let deposit = initial_payment(total, percentage);

        let (proof_url, proof_type, proof_amount) = match &patch.payment_proof {
            Some(proof) => (
                Some(proof.url.clone()),
                proof.proof_type.clone(),
                proof.amount,
            ),
            None => (
                existing.payment_proof_url.clone(),
                existing.payment_proof_type.clone(),
                existing.payment_proof_amount,
            ),
        };

        let mut updated = sqlx::query_as::<_, Budget>(&format!(
            r#"
            UPDATE budgets
            SET budget_date = $2, expiration_date = $3, status = $4, client_email = $5,
                discount_amount = $6, discount_description = $7, subtotal_price = $8,
                total_price = $9, initial_payment_percentage = $10, initial_payment = $11,
                payment_proof_url = $12, payment_proof_type = $13, payment_proof_amount = $14,
                notes = $15, updated_utc = NOW()
            WHERE budget_id = $1
            RETURNING {BUDGET_COLUMNS}
            "#
        ))
        .bind(budget_id)
        .bind(patch.budget_date.unwrap_or(existing.budget_date))
        .bind(patch.expiration_date.or(existing.expiration_date))
        .bind(new_status.as_str())
        .bind(patch.client_email.clone().or_else(|| existing.client_email.clone()))
        .bind(discount)
        .bind(
            patch
                .discount_description
                .clone()
                .or_else(|| existing.discount_description.clone()),
        )
        .bind(subtotal)
        .bind(total)
        .bind(percentage)
        .bind(deposit)
        .bind(&proof_url)
        .bind(&proof_type)
        .bind(proof_amount)
        .bind(patch.notes.clone().or_else(|| existing.notes.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update budget: {}", e)))?;

        // Re-render unless nothing but free-text notes changed. A render
        // failure here aborts the whole transaction.
        if !patch.is_notes_only() {
            let recipient = self
                .db
                .get_permit(updated.permit_id)
                .await?
                .map(|p| p.applicant_name);
            let path = self
                .render_budget_document(&updated, &items, recipient)
                .await?;
            sqlx::query(
                "UPDATE budgets SET document_path = $2 WHERE budget_id = $1",
            )
            .bind(budget_id)
            .bind(&path)
            .execute(&mut *tx)
            .await?;
            updated.document_path = Some(path);
        }

        if new_status == BudgetStatus::Approved {
            self.ensure_approval_side_effects(&mut tx, &updated).await?;
        }

        tx.commit().await?;

        BUDGETS_TOTAL
            .with_label_values(&[new_status.as_str()])
            .inc();
        info!(budget_id = %budget_id, status = %updated.status, "Budget updated");

        if new_status == BudgetStatus::Approved && !was_approved {
            self.notifier
                .notify_staff(
                    "budget_approved",
                    &budget_id.to_string(),
                    "Budget approved",
                    &format!(
                        "Budget {} was approved with a deposit of {}.",
                        budget_id,
                        updated.authoritative_deposit()
                    ),
                )
                .await;
        }

        Ok((updated, items))
    }

    /// Materialize the approval side effects: exactly one Work per budget and
    /// exactly one initial-deposit Income per work, safe under repeated
    /// invocation (double submissions, retried approvals).
    pub async fn ensure_approval_side_effects(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        budget: &Budget,
    ) -> Result<Work, AppError> {
        let deposit = budget.authoritative_deposit();

        let existing = sqlx::query_as::<_, Work>(
            r#"
            SELECT work_id, budget_id, status, initial_payment, created_utc, updated_utc
            FROM works
            WHERE budget_id = $1
            FOR UPDATE
            "#,
        )
        .bind(budget.budget_id)
        .fetch_optional(&mut **tx)
        .await?;

        let action = materialize_action(existing.as_ref().map(|w| w.initial_payment), deposit);
        let work = match (action, existing) {
            (MaterializeAction::Keep, Some(work)) => work,
            (MaterializeAction::CorrectAmount, Some(work)) => {
                info!(
                    work_id = %work.work_id,
                    old_amount = %work.initial_payment,
                    new_amount = %deposit,
                    "Correcting work deposit amount"
                );
                sqlx::query_as::<_, Work>(
                    r#"
                    UPDATE works SET initial_payment = $2, updated_utc = NOW()
                    WHERE work_id = $1
                    RETURNING work_id, budget_id, status, initial_payment, created_utc, updated_utc
                    "#,
                )
                .bind(work.work_id)
                .bind(deposit)
                .fetch_one(&mut **tx)
                .await?
            }
            _ => {
                // The unique budget_id constraint turns a concurrent double
                // create into an amount-refresh instead of a second row.
                sqlx::query_as::<_, Work>(
                    r#"
                    INSERT INTO works (work_id, budget_id, status, initial_payment)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (budget_id)
                    DO UPDATE SET initial_payment = EXCLUDED.initial_payment, updated_utc = NOW()
                    RETURNING work_id, budget_id, status, initial_payment, created_utc, updated_utc
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(budget.budget_id)
                .bind(WorkStatus::Pending.as_str())
                .bind(deposit)
                .fetch_one(&mut **tx)
                .await?
            }
        };

        let deposit_income = sqlx::query_as::<_, Income>(
            r#"
            SELECT income_id, work_id, budget_id, amount, category, gateway_session_id,
                gateway_payment_intent_id, notes, received_utc
            FROM incomes
            WHERE work_id = $1 AND category = $2
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(work.work_id)
        .bind(IncomeCategory::InitialDeposit.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let action = materialize_action(deposit_income.as_ref().map(|i| i.amount), deposit);
        match (action, deposit_income) {
            (MaterializeAction::Create, _) => {
                info!(
                    work_id = %work.work_id,
                    amount = %deposit,
                    "Recording initial deposit income (backfill when work pre-existed)"
                );
                // The partial unique index on (work_id, category) caps a work
                // at one initial-deposit row; a concurrent approval that got
                // there first just has its amount refreshed. A plain insert
                // here would abort the enclosing transaction on conflict.
                sqlx::query(
                    r#"
                    INSERT INTO incomes (income_id, work_id, budget_id, amount, category, notes)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (work_id, category) WHERE category = 'initial_deposit'
                    DO UPDATE SET amount = EXCLUDED.amount
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(work.work_id)
                .bind(budget.budget_id)
                .bind(deposit)
                .bind(IncomeCategory::InitialDeposit.as_str())
                .bind("Deposit collected on budget approval")
                .execute(&mut **tx)
                .await?;
            }
            (MaterializeAction::CorrectAmount, Some(income)) => {
                info!(
                    income_id = %income.income_id,
                    old_amount = %income.amount,
                    new_amount = %deposit,
                    "Correcting initial deposit income amount"
                );
                sqlx::query("UPDATE incomes SET amount = $2 WHERE income_id = $1")
                    .bind(income.income_id)
                    .bind(deposit)
                    .execute(&mut **tx)
                    .await?;
            }
            _ => {}
        }

        Ok(work)
    }

    /// Validate each line item against its variant's rules and snapshot
    /// catalog prices. Inputs matching neither variant are rejected upstream
    /// by deserialization.
    async fn resolve_line_items(
        &self,
        inputs: &[LineItemInput],
    ) -> Result<Vec<ResolvedLine>, AppError> {
        if inputs.is_empty() {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "A budget requires at least one line item"
            )));
        }

        let mut resolved = Vec::with_capacity(inputs.len());
        for input in inputs {
            if input.quantity() <= Decimal::ZERO {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Line item quantity must be positive"
                )));
            }

            let line = match input {
                LineItemInput::Catalog {
                    catalog_item_id,
                    quantity,
                } => {
                    let item = self
                        .db
                        .get_catalog_item(*catalog_item_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::ValidationError(anyhow::anyhow!(
                                "Catalog item {} not found",
                                catalog_item_id
                            ))
                        })?;
                    ResolvedLine {
                        catalog_item_id: Some(item.catalog_item_id),
                        name: item.name,
                        category: item.category,
                        quantity: *quantity,
                        unit_price: item.unit_price,
                        line_total: line_total(*quantity, item.unit_price),
                    }
                }
                LineItemInput::Manual {
                    name,
                    category,
                    quantity,
                    unit_price,
                } => {
                    if name.trim().is_empty() || category.trim().is_empty() {
                        return Err(AppError::ValidationError(anyhow::anyhow!(
                            "Manual line items require a name and category"
                        )));
                    }
                    if *unit_price < Decimal::ZERO {
                        return Err(AppError::ValidationError(anyhow::anyhow!(
                            "Line item unit price cannot be negative"
                        )));
                    }
                    ResolvedLine {
                        catalog_item_id: None,
                        name: name.clone(),
                        category: category.clone(),
                        quantity: *quantity,
                        unit_price: *unit_price,
                        line_total: line_total(*quantity, *unit_price),
                    }
                }
            };
            resolved.push(line);
        }

        Ok(resolved)
    }

    /// Render the budget document, embedding a checkout link for the deposit
    /// when one is still owed.
    async fn render_budget_document(
        &self,
        budget: &Budget,
        items: &[BudgetLineItem],
        recipient_name: Option<String>,
    ) -> Result<String, AppError> {
        let balance_due = budget.initial_payment;

        let payment_url = if balance_due > Decimal::ZERO {
            let mut metadata = HashMap::new();
            metadata.insert(META_PURPOSE.to_string(), PURPOSE_INVOICE_PAYMENT.to_string());
            metadata.insert(META_BUDGET_ID.to_string(), budget.budget_id.to_string());

            let amount = to_minor_units(balance_due)?;
            let session = self
                .gateway
                .create_checkout_session(
                    amount,
                    &format!("Initial payment for budget {}", budget.budget_id),
                    budget.client_email.as_deref(),
                    metadata,
                )
                .await
                .map_err(AppError::ExternalService)?;
            Some(session.url)
        } else {
            None
        };

        let request = RenderRequest {
            kind: DocumentKind::Budget,
            reference_id: budget.budget_id,
            title: format!("Budget {}", budget.budget_id),
            recipient_name,
            lines: items
                .iter()
                .map(|i| RenderLine {
                    description: i.name.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    line_total: i.line_total,
                })
                .collect(),
            subtotal: budget.subtotal_price,
            discount: budget.discount_amount,
            total: budget.total_price,
            balance_due,
            payment_url,
            notes: budget.notes.clone(),
        };

        self.documents.render(&request).await
    }
}

/// What approval materialization should do with a row, given the amount the
/// existing one carries (if any) and the budget's authoritative deposit.
/// Shared by the Work and the initial-deposit Income branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaterializeAction {
    Create,
    Keep,
    CorrectAmount,
}

fn materialize_action(existing_amount: Option<Decimal>, authoritative: Decimal) -> MaterializeAction {
    match existing_amount {
        None => MaterializeAction::Create,
        Some(amount) if amount == authoritative => MaterializeAction::Keep,
        Some(_) => MaterializeAction::CorrectAmount,
    }
}

/// Convert a decimal currency amount to gateway minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, AppError> {
    (amount * Decimal::from(100u32))
        .round_dp(0)
        .to_i64()
        .ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!("Amount out of range: {}", amount))
        })
}

async fn insert_line_items(
    tx: &mut Transaction<'_, Postgres>,
    budget_id: Uuid,
    resolved: &[ResolvedLine],
) -> Result<Vec<BudgetLineItem>, AppError> {
    let mut items = Vec::with_capacity(resolved.len());
    for line in resolved {
        let item = sqlx::query_as::<_, BudgetLineItem>(
            r#"
            INSERT INTO budget_line_items (
                line_item_id, budget_id, catalog_item_id, name, category,
                quantity, unit_price, line_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING line_item_id, budget_id, catalog_item_id, name, category, quantity,
                unit_price, line_total, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(budget_id)
        .bind(line.catalog_item_id)
        .bind(&line.name)
        .bind(&line.category)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.line_total)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert line item: {}", e)))?;
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_to_minor_units() {
        assert_eq!(to_minor_units("135".parse().unwrap()).unwrap(), 13500);
        assert_eq!(to_minor_units("206.00".parse().unwrap()).unwrap(), 20600);
        assert_eq!(to_minor_units("0.01".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_first_approval_creates_then_second_keeps() {
        // First approval: no Work and no deposit Income exist yet.
        assert_eq!(
            materialize_action(None, dec("200.00")),
            MaterializeAction::Create
        );
        // Second approval of the same budget: both rows already carry the
        // authoritative deposit, so nothing new is created.
        assert_eq!(
            materialize_action(Some(dec("200.00")), dec("200.00")),
            MaterializeAction::Keep
        );
    }

    #[test]
    fn test_proof_amount_drift_corrects_in_place() {
        // Re-approval after a payment proof changed the authoritative deposit:
        // the existing rows get their amount fixed, not duplicated.
        assert_eq!(
            materialize_action(Some(dec("135.00")), dec("150.00")),
            MaterializeAction::CorrectAmount
        );
    }
}
