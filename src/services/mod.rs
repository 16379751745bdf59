pub mod budgets;
pub mod change_orders;
pub mod database;
pub mod dedup;
pub mod documents;
pub mod email;
pub mod error;
pub mod final_invoices;
pub mod gateway;
pub mod metrics;
pub mod notifications;
pub mod reconciler;

pub use budgets::BudgetService;
pub use change_orders::ChangeOrderService;
pub use database::Database;
pub use dedup::NotificationDedup;
pub use documents::DocumentClient;
pub use email::EmailService;
pub use error::AppError;
pub use final_invoices::FinalInvoiceService;
pub use gateway::GatewayClient;
pub use metrics::get_metrics;
pub use notifications::Notifier;
pub use reconciler::WebhookReconciler;
