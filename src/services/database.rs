//! Database connection pool and shared read/lookup queries.
//!
//! Multi-entity transactional mutations live with their owning component
//! services; this module owns the pool plus the lookups shared across them.

use crate::models::{
    Budget, BudgetLineItem, CatalogItem, ChangeOrder, FinalInvoice, Income, Permit, Work,
    WorkExtraItem,
};
use crate::services::error::AppError;
use crate::services::metrics::DB_QUERY_DURATION;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "works-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reference data
    // -------------------------------------------------------------------------

    /// Get a permit by ID.
    #[instrument(skip(self), fields(permit_id = %permit_id))]
    pub async fn get_permit(&self, permit_id: Uuid) -> Result<Option<Permit>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_permit"])
            .start_timer();

        let permit = sqlx::query_as::<_, Permit>(
            r#"
            SELECT permit_id, permit_number, applicant_name, applicant_email, property_address, created_utc
            FROM permits
            WHERE permit_id = $1
            "#,
        )
        .bind(permit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get permit: {}", e)))?;

        timer.observe_duration();

        Ok(permit)
    }

    /// Get an active catalog item by ID.
    #[instrument(skip(self), fields(catalog_item_id = %catalog_item_id))]
    pub async fn get_catalog_item(
        &self,
        catalog_item_id: Uuid,
    ) -> Result<Option<CatalogItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_catalog_item"])
            .start_timer();

        let item = sqlx::query_as::<_, CatalogItem>(
            r#"
            SELECT catalog_item_id, name, category, unit_price, active, created_utc
            FROM catalog_items
            WHERE catalog_item_id = $1 AND active
            "#,
        )
        .bind(catalog_item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get catalog item: {}", e))
        })?;

        timer.observe_duration();

        Ok(item)
    }

    // -------------------------------------------------------------------------
    // Budgets
    // -------------------------------------------------------------------------

    /// Get a budget by ID.
    #[instrument(skip(self), fields(budget_id = %budget_id))]
    pub async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_budget"])
            .start_timer();

        let budget = sqlx::query_as::<_, Budget>(
            r#"
            SELECT budget_id, permit_id, budget_date, expiration_date, status, client_email,
                discount_amount, discount_description, subtotal_price, total_price,
                initial_payment_percentage, initial_payment, payment_proof_url,
                payment_proof_type, payment_proof_amount, notes, document_path,
                created_utc, updated_utc
            FROM budgets
            WHERE budget_id = $1
            "#,
        )
        .bind(budget_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get budget: {}", e)))?;

        timer.observe_duration();

        Ok(budget)
    }

    /// Get all line items for a budget.
    #[instrument(skip(self), fields(budget_id = %budget_id))]
    pub async fn get_budget_line_items(
        &self,
        budget_id: Uuid,
    ) -> Result<Vec<BudgetLineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_budget_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, BudgetLineItem>(
            r#"
            SELECT line_item_id, budget_id, catalog_item_id, name, category, quantity,
                unit_price, line_total, created_utc
            FROM budget_line_items
            WHERE budget_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(budget_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        timer.observe_duration();

        Ok(items)
    }

    /// Store the rendered document path for a budget. Used by the best-effort
    /// post-commit render on creation.
    #[instrument(skip(self), fields(budget_id = %budget_id))]
    pub async fn set_budget_document_path(
        &self,
        budget_id: Uuid,
        document_path: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE budgets SET document_path = $2, updated_utc = NOW() WHERE budget_id = $1")
            .bind(budget_id)
            .bind(document_path)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to store document path: {}", e))
            })?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Works and incomes
    // -------------------------------------------------------------------------

    /// Get a work by ID.
    #[instrument(skip(self), fields(work_id = %work_id))]
    pub async fn get_work(&self, work_id: Uuid) -> Result<Option<Work>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_work"])
            .start_timer();

        let work = sqlx::query_as::<_, Work>(
            r#"
            SELECT work_id, budget_id, status, initial_payment, created_utc, updated_utc
            FROM works
            WHERE work_id = $1
            "#,
        )
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get work: {}", e)))?;

        timer.observe_duration();

        Ok(work)
    }

    /// Get the work materialized for a budget, if any.
    #[instrument(skip(self), fields(budget_id = %budget_id))]
    pub async fn get_work_by_budget(&self, budget_id: Uuid) -> Result<Option<Work>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_work_by_budget"])
            .start_timer();

        let work = sqlx::query_as::<_, Work>(
            r#"
            SELECT work_id, budget_id, status, initial_payment, created_utc, updated_utc
            FROM works
            WHERE budget_id = $1
            "#,
        )
        .bind(budget_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get work: {}", e)))?;

        timer.observe_duration();

        Ok(work)
    }

    /// Find an income row already recorded for a gateway correlation id.
    /// Duplicate webhook deliveries are detected through this lookup before
    /// any insert is attempted.
    #[instrument(skip(self))]
    pub async fn find_income_by_correlation(
        &self,
        session_id: Option<&str>,
        payment_intent_id: Option<&str>,
    ) -> Result<Option<Income>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_income_by_correlation"])
            .start_timer();

        let income = sqlx::query_as::<_, Income>(
            r#"
            SELECT income_id, work_id, budget_id, amount, category, gateway_session_id,
                gateway_payment_intent_id, notes, received_utc
            FROM incomes
            WHERE (gateway_session_id = $1 AND $1 IS NOT NULL)
               OR (gateway_payment_intent_id = $2 AND $2 IS NOT NULL)
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find income: {}", e)))?;

        timer.observe_duration();

        Ok(income)
    }

    // -------------------------------------------------------------------------
    // Final invoices
    // -------------------------------------------------------------------------

    /// Get a final invoice by ID.
    #[instrument(skip(self), fields(final_invoice_id = %final_invoice_id))]
    pub async fn get_final_invoice(
        &self,
        final_invoice_id: Uuid,
    ) -> Result<Option<FinalInvoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_final_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, FinalInvoice>(
            r#"
            SELECT final_invoice_id, work_id, status, original_budget_total, initial_payment_made,
                subtotal_extras, final_amount_due, payment_date, notes, document_path,
                created_utc, updated_utc
            FROM final_invoices
            WHERE final_invoice_id = $1
            "#,
        )
        .bind(final_invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get final invoice: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get all extra items for a final invoice.
    #[instrument(skip(self), fields(final_invoice_id = %final_invoice_id))]
    pub async fn get_extra_items(
        &self,
        final_invoice_id: Uuid,
    ) -> Result<Vec<WorkExtraItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_extra_items"])
            .start_timer();

        let items = sqlx::query_as::<_, WorkExtraItem>(
            r#"
            SELECT extra_item_id, final_invoice_id, description, quantity, unit_price,
                line_total, created_utc
            FROM work_extra_items
            WHERE final_invoice_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(final_invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get extra items: {}", e))
        })?;

        timer.observe_duration();

        Ok(items)
    }

    // -------------------------------------------------------------------------
    // Change orders
    // -------------------------------------------------------------------------

    /// Get a change order by ID.
    #[instrument(skip(self), fields(change_order_id = %change_order_id))]
    pub async fn get_change_order(
        &self,
        change_order_id: Uuid,
    ) -> Result<Option<ChangeOrder>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_change_order"])
            .start_timer();

        let order = sqlx::query_as::<_, ChangeOrder>(
            r#"
            SELECT change_order_id, work_id, description, total_cost, status, approval_token,
                rejection_token, requested_utc, responded_utc, document_path,
                created_utc, updated_utc
            FROM change_orders
            WHERE change_order_id = $1
            "#,
        )
        .bind(change_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get change order: {}", e))
        })?;

        timer.observe_duration();

        Ok(order)
    }
}
