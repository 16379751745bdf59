//! Change order approval workflow.
//!
//! Drafting, admin review, client send-out with single-use decision tokens,
//! and the client's binding response.

use crate::models::change_order::respond_conflict_message;
use crate::models::{ChangeOrder, ChangeOrderDecision, ChangeOrderStatus};
use crate::services::database::Database;
use crate::services::documents::{DocumentClient, DocumentKind, RenderLine, RenderRequest};
use crate::services::email::EmailService;
use crate::services::error::AppError;
use crate::services::notifications::Notifier;
use rand::RngCore;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "change_order_id, work_id, description, total_cost, status, \
     approval_token, rejection_token, requested_utc, responded_utc, document_path, \
     created_utc, updated_utc";

#[derive(Clone)]
pub struct ChangeOrderService {
    db: Database,
    documents: DocumentClient,
    email: EmailService,
    notifier: Notifier,
    public_base_url: String,
}

impl ChangeOrderService {
    pub fn new(
        db: Database,
        documents: DocumentClient,
        email: EmailService,
        notifier: Notifier,
        public_base_url: String,
    ) -> Self {
        Self {
            db,
            documents,
            email,
            notifier,
            public_base_url,
        }
    }

    /// Create a change order draft. Promotes straight to admin review when
    /// the proposal is already complete.
    #[instrument(skip(self, description), fields(work_id = %work_id))]
    pub async fn create_change_order(
        &self,
        work_id: Uuid,
        description: Option<String>,
        total_cost: Decimal,
    ) -> Result<ChangeOrder, AppError> {
        if self.db.get_work(work_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!("Work not found")));
        }
        if total_cost < Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Change order cost cannot be negative"
            )));
        }

        let status = if ChangeOrder::ready_for_review(description.as_deref(), total_cost) {
            ChangeOrderStatus::PendingAdminReview
        } else {
            ChangeOrderStatus::Draft
        };

        let order = sqlx::query_as::<_, ChangeOrder>(&format!(
            r#"
            INSERT INTO change_orders (change_order_id, work_id, description, total_cost, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(work_id)
        .bind(&description)
        .bind(total_cost)
        .bind(status.as_str())
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create change order: {}", e))
        })?;

        info!(change_order_id = %order.change_order_id, status = %order.status, "Change order created");

        Ok(order)
    }

    /// Edit a change order. Only allowed before the client has been asked to
    /// decide; a completed draft auto-promotes to admin review.
    #[instrument(skip(self, description), fields(change_order_id = %change_order_id))]
    pub async fn update_change_order(
        &self,
        change_order_id: Uuid,
        description: Option<String>,
        total_cost: Option<Decimal>,
    ) -> Result<ChangeOrder, AppError> {
        let existing = self
            .db
            .get_change_order(change_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Change order not found")))?;

        if !existing.status().is_editable() {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Change order can no longer be edited in status '{}'",
                existing.status
            )));
        }

        let description = description.or_else(|| existing.description.clone());
        let total_cost = total_cost.unwrap_or(existing.total_cost);
        if total_cost < Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Change order cost cannot be negative"
            )));
        }

        let status = if ChangeOrder::ready_for_review(description.as_deref(), total_cost) {
            ChangeOrderStatus::PendingAdminReview
        } else {
            ChangeOrderStatus::Draft
        };

        let order = sqlx::query_as::<_, ChangeOrder>(&format!(
            r#"
            UPDATE change_orders
            SET description = $2, total_cost = $3, status = $4, updated_utc = NOW()
            WHERE change_order_id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(change_order_id)
        .bind(&description)
        .bind(total_cost)
        .bind(status.as_str())
        .fetch_one(self.db.pool())
        .await?;

        info!(change_order_id = %change_order_id, status = %order.status, "Change order updated");

        Ok(order)
    }

    /// Send the change order to the client for a decision: render the
    /// document, mint the two single-use decision tokens, and email both
    /// decision links. Sending again while the client has not yet responded
    /// re-mints the tokens and re-emails, so a lost or failed email can be
    /// recovered; previously emailed links stop working.
    #[instrument(skip(self), fields(change_order_id = %change_order_id))]
    pub async fn send(&self, change_order_id: Uuid) -> Result<ChangeOrder, AppError> {
        let order = self
            .db
            .get_change_order(change_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Change order not found")))?;

        let observed_status = order.status();
        if !observed_status.is_sendable() {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "Change order cannot be sent in status '{}'",
                observed_status.as_str()
            )));
        }

        if order.total_cost <= Decimal::ZERO {
            return Err(AppError::ValidationError(anyhow::anyhow!(
                "Change order requires a positive total cost before sending"
            )));
        }

        let client_email = self.resolve_client_email(order.work_id).await?;

        let document_path = self
            .documents
            .render(&RenderRequest {
                kind: DocumentKind::ChangeOrder,
                reference_id: order.change_order_id,
                title: format!("Change order {}", order.change_order_id),
                recipient_name: None,
                lines: vec![RenderLine {
                    description: order
                        .description
                        .clone()
                        .unwrap_or_else(|| "Scope change".to_string()),
                    quantity: Decimal::ONE,
                    unit_price: order.total_cost,
                    line_total: order.total_cost,
                }],
                subtotal: order.total_cost,
                discount: Decimal::ZERO,
                total: order.total_cost,
                balance_due: Decimal::ZERO,
                payment_url: None,
                notes: None,
            })
            .await?;

        let approval_token = mint_token();
        let rejection_token = mint_token();

        let updated = sqlx::query_as::<_, ChangeOrder>(&format!(
            r#"
            UPDATE change_orders
            SET status = $2, approval_token = $3, rejection_token = $4,
                requested_utc = NOW(), document_path = $5, updated_utc = NOW()
            WHERE change_order_id = $1 AND status = $6
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(change_order_id)
        .bind(ChangeOrderStatus::PendingClientApproval.as_str())
        .bind(&approval_token)
        .bind(&rejection_token)
        .bind(&document_path)
        .bind(observed_status.as_str())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| {
            AppError::StateConflict(anyhow::anyhow!(
                "Change order state changed while sending; try again"
            ))
        })?;

        let approve_url = self.decision_url(change_order_id, "approved", &approval_token);
        let reject_url = self.decision_url(change_order_id, "rejected", &rejection_token);

        let plain = format!(
            "A change to the scope of your construction work is awaiting your decision.\n\n\
             Proposed change: {}\nAdditional cost: {}\n\n\
             Approve: {}\nReject: {}\n",
            updated.description.as_deref().unwrap_or("(see document)"),
            updated.total_cost,
            approve_url,
            reject_url
        );
        let html = format!(
            "<p>A change to the scope of your construction work is awaiting your decision.</p>\
             <p><strong>Proposed change:</strong> {}<br/>\
             <strong>Additional cost:</strong> {}</p>\
             <p><a href=\"{}\">Approve</a> | <a href=\"{}\">Reject</a></p>",
            updated.description.as_deref().unwrap_or("(see document)"),
            updated.total_cost,
            approve_url,
            reject_url
        );

        if let Err(e) = self
            .email
            .send(&client_email, "Change order awaiting your approval", &plain, &html)
            .await
        {
            // The tokens are already committed; the operator can resend from
            // the pending state after fixing the mail problem.
            tracing::error!(
                change_order_id = %change_order_id,
                error = %e,
                "Failed to email change order decision links"
            );
        }

        info!(change_order_id = %change_order_id, "Change order sent for client approval");

        Ok(updated)
    }

    /// Apply the client's decision. The token must be the secret minted for
    /// that specific decision; both secrets are cleared on the first
    /// successful response so neither can be replayed.
    #[instrument(skip(self, token), fields(change_order_id = %change_order_id))]
    pub async fn respond(
        &self,
        change_order_id: Uuid,
        token: &str,
        decision: &str,
    ) -> Result<ChangeOrder, AppError> {
        let decision = ChangeOrderDecision::from_string(decision).ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!(
                "Decision must be 'approved' or 'rejected'"
            ))
        })?;

        let order = self
            .db
            .get_change_order(change_order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Change order not found")))?;

        let current = order.status();
        if current != ChangeOrderStatus::PendingClientApproval {
            return Err(AppError::StateConflict(anyhow::anyhow!(
                "{}",
                respond_conflict_message(current, decision)
            )));
        }

        // Wrong-decision tokens fail the same way as wrong tokens: a 403
        // that does not reveal which secret exists.
        match order.expected_token(decision) {
            Some(expected) if expected == token => {}
            _ => {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Invalid token for this decision"
                )))
            }
        }

        let updated = sqlx::query_as::<_, ChangeOrder>(&format!(
            r#"
            UPDATE change_orders
            SET status = $2, responded_utc = NOW(), approval_token = NULL,
                rejection_token = NULL, updated_utc = NOW()
            WHERE change_order_id = $1 AND status = $3
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(change_order_id)
        .bind(decision.final_status().as_str())
        .bind(ChangeOrderStatus::PendingClientApproval.as_str())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| {
            // Lost a race with another response; report it as already decided.
            AppError::StateConflict(anyhow::anyhow!(
                "Change order is not awaiting client approval"
            ))
        })?;

        info!(
            change_order_id = %change_order_id,
            decision = decision.as_str(),
            "Change order decision recorded"
        );

        self.notifier
            .notify_staff(
                "change_order_decided",
                &change_order_id.to_string(),
                &format!("Change order {}", decision.as_str()),
                &format!(
                    "The client has {} change order {} ({}).",
                    decision.as_str(),
                    change_order_id,
                    updated.total_cost
                ),
            )
            .await;

        Ok(updated)
    }

    /// Resolve the client's email: the budget's stored contact first, then
    /// the permit applicant.
    async fn resolve_client_email(&self, work_id: Uuid) -> Result<String, AppError> {
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

        if let Some(email) = budget.client_email {
            return Ok(email);
        }

        let permit = self.db.get_permit(budget.permit_id).await?;
        permit
            .and_then(|p| p.applicant_email)
            .ok_or_else(|| {
                AppError::ValidationError(anyhow::anyhow!(
                    "No client email on the budget or its permit"
                ))
            })
    }

    fn decision_url(&self, change_order_id: Uuid, decision: &str, token: &str) -> String {
        format!(
            "{}/change-orders/{}/respond?decision={}&token={}",
            self.public_base_url, change_order_id, decision, token
        )
    }
}

/// Mint an opaque single-use secret.
fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_tokens_are_unique_and_opaque() {
        let a = mint_token();
        let b = mint_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
