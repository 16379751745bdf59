//! Change order model and approval state machine rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Change order status. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderStatus {
    Draft,
    PendingAdminReview,
    PendingClientApproval,
    Approved,
    Rejected,
}

impl ChangeOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrderStatus::Draft => "draft",
            ChangeOrderStatus::PendingAdminReview => "pending_admin_review",
            ChangeOrderStatus::PendingClientApproval => "pending_client_approval",
            ChangeOrderStatus::Approved => "approved",
            ChangeOrderStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending_admin_review" => ChangeOrderStatus::PendingAdminReview,
            "pending_client_approval" => ChangeOrderStatus::PendingClientApproval,
            "approved" => ChangeOrderStatus::Approved,
            "rejected" => ChangeOrderStatus::Rejected,
            _ => ChangeOrderStatus::Draft,
        }
    }

    /// Editing is only permitted before the client has been asked to decide.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            ChangeOrderStatus::Draft | ChangeOrderStatus::PendingAdminReview
        )
    }

    /// Sending is allowed from admin review and again while awaiting the
    /// client, so a lost email can be re-sent with fresh tokens. Terminal
    /// states and drafts cannot be sent.
    pub fn is_sendable(&self) -> bool {
        matches!(
            self,
            ChangeOrderStatus::PendingAdminReview | ChangeOrderStatus::PendingClientApproval
        )
    }
}

/// The client's decision on a change order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderDecision {
    Approved,
    Rejected,
}

impl ChangeOrderDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrderDecision::Approved => "approved",
            ChangeOrderDecision::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(ChangeOrderDecision::Approved),
            "rejected" => Some(ChangeOrderDecision::Rejected),
            _ => None,
        }
    }

    pub fn final_status(&self) -> ChangeOrderStatus {
        match self {
            ChangeOrderDecision::Approved => ChangeOrderStatus::Approved,
            ChangeOrderDecision::Rejected => ChangeOrderStatus::Rejected,
        }
    }
}

/// Proposed scope/cost amendment on a work. The two tokens are independent
/// single-use secrets, each valid only for its matching decision; both are
/// cleared together on the first successful response.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChangeOrder {
    pub change_order_id: Uuid,
    pub work_id: Uuid,
    pub description: Option<String>,
    pub total_cost: Decimal,
    pub status: String,
    #[serde(skip_serializing)]
    pub approval_token: Option<String>,
    #[serde(skip_serializing)]
    pub rejection_token: Option<String>,
    pub requested_utc: Option<DateTime<Utc>>,
    pub responded_utc: Option<DateTime<Utc>>,
    pub document_path: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ChangeOrder {
    pub fn status(&self) -> ChangeOrderStatus {
        ChangeOrderStatus::from_string(&self.status)
    }

    /// The secret minted for this specific decision. The "other" token must
    /// never satisfy a decision, so the lookup is exact.
    pub fn expected_token(&self, decision: ChangeOrderDecision) -> Option<&str> {
        match decision {
            ChangeOrderDecision::Approved => self.approval_token.as_deref(),
            ChangeOrderDecision::Rejected => self.rejection_token.as_deref(),
        }
    }

    /// A draft promotes to admin review once the proposal is complete.
    pub fn ready_for_review(description: Option<&str>, total_cost: Decimal) -> bool {
        description.map(|d| !d.trim().is_empty()).unwrap_or(false)
            && total_cost > Decimal::ZERO
    }
}

/// Conflict message for a response arriving in a non-pending state,
/// distinguishing a replay of the same decision from a contradictory one.
pub fn respond_conflict_message(
    current: ChangeOrderStatus,
    decision: ChangeOrderDecision,
) -> String {
    match current {
        ChangeOrderStatus::Approved | ChangeOrderStatus::Rejected => {
            if current == decision.final_status() {
                format!("Change order has already been {}", current.as_str())
            } else {
                format!(
                    "Change order was already {} and can no longer be {}",
                    current.as_str(),
                    decision.as_str()
                )
            }
        }
        _ => "Change order is not awaiting client approval".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editable_states() {
        assert!(ChangeOrderStatus::Draft.is_editable());
        assert!(ChangeOrderStatus::PendingAdminReview.is_editable());
        assert!(!ChangeOrderStatus::PendingClientApproval.is_editable());
        assert!(!ChangeOrderStatus::Approved.is_editable());
        assert!(!ChangeOrderStatus::Rejected.is_editable());
    }

    #[test]
    fn test_sendable_states() {
        assert!(ChangeOrderStatus::PendingAdminReview.is_sendable());
        // Re-send while the client holds an unanswered request is allowed.
        assert!(ChangeOrderStatus::PendingClientApproval.is_sendable());
        assert!(!ChangeOrderStatus::Draft.is_sendable());
        assert!(!ChangeOrderStatus::Approved.is_sendable());
        assert!(!ChangeOrderStatus::Rejected.is_sendable());
    }

    #[test]
    fn test_ready_for_review() {
        assert!(ChangeOrder::ready_for_review(
            Some("extend back patio"),
            "1500".parse().unwrap()
        ));
        assert!(!ChangeOrder::ready_for_review(None, "1500".parse().unwrap()));
        assert!(!ChangeOrder::ready_for_review(Some("  "), "1500".parse().unwrap()));
        assert!(!ChangeOrder::ready_for_review(Some("patio"), Decimal::ZERO));
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!(
            ChangeOrderDecision::from_string("approved"),
            Some(ChangeOrderDecision::Approved)
        );
        assert_eq!(
            ChangeOrderDecision::from_string("rejected"),
            Some(ChangeOrderDecision::Rejected)
        );
        assert_eq!(ChangeOrderDecision::from_string("maybe"), None);
    }

    #[test]
    fn test_expected_token_is_decision_scoped() {
        let order = sample_order(
            ChangeOrderStatus::PendingClientApproval,
            Some("tok-approve"),
            Some("tok-reject"),
        );
        assert_eq!(
            order.expected_token(ChangeOrderDecision::Approved),
            Some("tok-approve")
        );
        assert_eq!(
            order.expected_token(ChangeOrderDecision::Rejected),
            Some("tok-reject")
        );
        // The approval secret can never satisfy a rejection.
        assert_ne!(
            order.expected_token(ChangeOrderDecision::Rejected),
            Some("tok-approve")
        );
    }

    #[test]
    fn test_cleared_tokens_never_match() {
        let order = sample_order(ChangeOrderStatus::Approved, None, None);
        assert_eq!(order.expected_token(ChangeOrderDecision::Approved), None);
        assert_eq!(order.expected_token(ChangeOrderDecision::Rejected), None);
    }

    #[test]
    fn test_conflict_messages() {
        let same = respond_conflict_message(
            ChangeOrderStatus::Approved,
            ChangeOrderDecision::Approved,
        );
        assert!(same.contains("already been approved"));

        let other = respond_conflict_message(
            ChangeOrderStatus::Approved,
            ChangeOrderDecision::Rejected,
        );
        assert!(other.contains("no longer be rejected"));

        let unrelated =
            respond_conflict_message(ChangeOrderStatus::Draft, ChangeOrderDecision::Approved);
        assert!(unrelated.contains("not awaiting client approval"));
    }

    fn sample_order(
        status: ChangeOrderStatus,
        approval: Option<&str>,
        rejection: Option<&str>,
    ) -> ChangeOrder {
        ChangeOrder {
            change_order_id: Uuid::new_v4(),
            work_id: Uuid::new_v4(),
            description: Some("additional drywall".to_string()),
            total_cost: "800".parse().unwrap(),
            status: status.as_str().to_string(),
            approval_token: approval.map(str::to_string),
            rejection_token: rejection.map(str::to_string),
            requested_utc: None,
            responded_utc: None,
            document_path: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }
}
