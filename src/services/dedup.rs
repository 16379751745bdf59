//! In-memory notification deduplication.
//!
//! Process-lifetime suppression of repeat alerts, keyed by (normalized
//! recipient, event kind, entity id). State is not shared across instances
//! and resets on restart.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Suppression window for repeat sends to the same key.
const COOLDOWN: Duration = Duration::from_secs(60);

/// Interval at which fully aged-out keys are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

type DedupKey = (String, String, String);

#[derive(Clone)]
pub struct NotificationDedup {
    entries: Arc<DashMap<DedupKey, Vec<Instant>>>,
    cooldown: Duration,
}

impl Default for NotificationDedup {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDedup {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            cooldown: COOLDOWN,
        }
    }

    fn key(recipient: &str, event_kind: &str, entity_id: &str) -> DedupKey {
        (
            recipient.trim().to_lowercase(),
            event_kind.to_string(),
            entity_id.to_string(),
        )
    }

    /// Whether a notification for this key may go out now. Suppresses when a
    /// send is still inside the cooldown window.
    pub fn should_send(&self, recipient: &str, event_kind: &str, entity_id: &str) -> bool {
        self.should_send_at(recipient, event_kind, entity_id, Instant::now())
    }

    fn should_send_at(
        &self,
        recipient: &str,
        event_kind: &str,
        entity_id: &str,
        now: Instant,
    ) -> bool {
        let key = Self::key(recipient, event_kind, entity_id);
        match self.entries.get_mut(&key) {
            Some(mut timestamps) => {
                timestamps.retain(|sent| now.duration_since(*sent) < self.cooldown);
                timestamps.is_empty()
            }
            None => true,
        }
    }

    /// Record a send for this key.
    pub fn mark_sent(&self, recipient: &str, event_kind: &str, entity_id: &str) {
        self.mark_sent_at(recipient, event_kind, entity_id, Instant::now());
    }

    fn mark_sent_at(&self, recipient: &str, event_kind: &str, entity_id: &str, now: Instant) {
        let key = Self::key(recipient, event_kind, entity_id);
        self.entries.entry(key).or_default().push(now);
    }

    /// Drop keys whose whole timestamp set has aged out.
    pub fn sweep(&self) {
        let now = Instant::now();
        let cooldown = self.cooldown;
        self.entries
            .retain(|_, timestamps| timestamps.iter().any(|sent| now.duration_since(*sent) < cooldown));
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let dedup = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let before = dedup.entries.len();
                dedup.sweep();
                tracing::debug!(
                    before = before,
                    after = dedup.entries.len(),
                    "Notification dedup sweep completed"
                );
            }
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_within_cooldown() {
        let dedup = NotificationDedup::new();
        let t0 = Instant::now();

        assert!(dedup.should_send_at("ops@example.com", "budget_approved", "b1", t0));
        dedup.mark_sent_at("ops@example.com", "budget_approved", "b1", t0);

        assert!(!dedup.should_send_at(
            "ops@example.com",
            "budget_approved",
            "b1",
            t0 + Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_reappears_after_cooldown() {
        let dedup = NotificationDedup::new();
        let t0 = Instant::now();

        dedup.mark_sent_at("ops@example.com", "budget_approved", "b1", t0);
        assert!(dedup.should_send_at(
            "ops@example.com",
            "budget_approved",
            "b1",
            t0 + Duration::from_secs(61)
        ));
    }

    #[test]
    fn test_recipient_normalization() {
        let dedup = NotificationDedup::new();
        let t0 = Instant::now();

        dedup.mark_sent_at("Ops@Example.com ", "budget_approved", "b1", t0);
        assert!(!dedup.should_send_at(
            "ops@example.com",
            "budget_approved",
            "b1",
            t0 + Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let dedup = NotificationDedup::new();
        let t0 = Instant::now();

        dedup.mark_sent_at("ops@example.com", "budget_approved", "b1", t0);
        assert!(dedup.should_send_at("ops@example.com", "budget_approved", "b2", t0));
        assert!(dedup.should_send_at("ops@example.com", "change_order_decided", "b1", t0));
        assert!(dedup.should_send_at("other@example.com", "budget_approved", "b1", t0));
    }

    #[test]
    fn test_sweep_drops_aged_keys() {
        let dedup = NotificationDedup::new();
        let old = Instant::now() - Duration::from_secs(600);

        dedup.mark_sent_at("ops@example.com", "budget_approved", "b1", old);
        dedup.mark_sent_at("ops@example.com", "budget_approved", "b2", Instant::now());
        assert_eq!(dedup.len(), 2);

        dedup.sweep();
        assert_eq!(dedup.len(), 1);
    }
}
