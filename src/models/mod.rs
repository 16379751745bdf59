//! Data models for works-billing-service.

pub mod budget;
pub mod catalog;
pub mod change_order;
pub mod final_invoice;
pub mod income;
pub mod permit;
pub mod work;

pub use budget::{
    Budget, BudgetLineItem, BudgetStatus, CreateBudget, LineItemInput, PaymentProof, UpdateBudget,
};
pub use catalog::CatalogItem;
pub use change_order::{ChangeOrder, ChangeOrderDecision, ChangeOrderStatus};
pub use final_invoice::{FinalInvoice, FinalInvoiceStatus, UpdateExtraItem, WorkExtraItem};
pub use income::{Income, IncomeCategory};
pub use permit::Permit;
pub use work::{Work, WorkStatus};
