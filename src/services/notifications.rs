//! Internal notification fan-out.
//!
//! Resolves the staff recipient list, runs it through the dedup filter, and
//! delivers via email. Failures are logged; a missed internal alert never
//! fails the triggering operation.

use crate::services::dedup::NotificationDedup;
use crate::services::email::EmailService;
use crate::services::metrics::NOTIFICATIONS_SUPPRESSED_TOTAL;

#[derive(Clone)]
pub struct Notifier {
    email: EmailService,
    dedup: NotificationDedup,
    staff_emails: Vec<String>,
}

impl Notifier {
    pub fn new(email: EmailService, dedup: NotificationDedup, staff_emails: Vec<String>) -> Self {
        Self {
            email,
            dedup,
            staff_emails,
        }
    }

    /// Recipients still eligible for this (event, entity) after dedup.
    pub fn eligible_recipients(&self, event_kind: &str, entity_id: &str) -> Vec<String> {
        self.staff_emails
            .iter()
            .filter(|recipient| {
                let eligible = self.dedup.should_send(recipient, event_kind, entity_id);
                if !eligible {
                    NOTIFICATIONS_SUPPRESSED_TOTAL
                        .with_label_values(&[event_kind])
                        .inc();
                }
                eligible
            })
            .cloned()
            .collect()
    }

    /// Notify internal stakeholders about a lifecycle event.
    pub async fn notify_staff(&self, event_kind: &str, entity_id: &str, subject: &str, body: &str) {
        let recipients = self.eligible_recipients(event_kind, entity_id);
        if recipients.is_empty() {
            tracing::debug!(
                event_kind = %event_kind,
                entity_id = %entity_id,
                "All staff recipients suppressed by dedup"
            );
            return;
        }

        let html_body = format!("<p>{}</p>", body);
        for recipient in recipients {
            match self.email.send(&recipient, subject, body, &html_body).await {
                Ok(()) => self.dedup.mark_sent(&recipient, event_kind, entity_id),
                Err(e) => {
                    tracing::error!(
                        to = %recipient,
                        event_kind = %event_kind,
                        error = %e,
                        "Failed to deliver staff notification"
                    );
                }
            }
        }
    }
}
