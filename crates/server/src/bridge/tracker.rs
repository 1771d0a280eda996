//! Request idempotency.
//!
//! Every inbound `game_action` carries a client-generated request id; the
//! tracker remembers which (request id, user) pairs already produced an
//! effect, so transport retries never act twice. Entries are retained for
//! at least five minutes and garbage-collected periodically.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use holdem_engine::ActionKind;
use uuid::Uuid;

const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
pub struct TrackedAction {
    pub table_id: Uuid,
    pub action: ActionKind,
    pub amount: u64,
    pub seen_at: Instant,
}

pub struct ActionTracker {
    entries: DashMap<(i64, String), TrackedAction>,
    retention: Duration,
}

impl Default for ActionTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        ActionTracker {
            entries: DashMap::new(),
            retention,
        }
    }

    /// Record the request if it is new. Returns false for a replay, which
    /// the caller must silently ignore. An empty request id is a legacy
    /// client and bypasses deduplication entirely.
    pub fn record(
        &self,
        user_id: i64,
        request_id: &str,
        table_id: Uuid,
        action: ActionKind,
        amount: u64,
    ) -> bool {
        if request_id.is_empty() {
            return true;
        }
        let key = (user_id, request_id.to_string());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            TrackedAction {
                table_id,
                action,
                amount,
                seen_at: Instant::now(),
            },
        );
        true
    }

    /// Evict entries older than the retention window.
    pub fn gc(&self) {
        let cutoff = self.retention;
        self.entries.retain(|_, v| v.seen_at.elapsed() < cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_delivery_is_rejected() {
        let tracker = ActionTracker::new();
        let table = Uuid::new_v4();
        assert!(tracker.record(1, "req-1", table, ActionKind::Call, 0));
        assert!(!tracker.record(1, "req-1", table, ActionKind::Call, 0));
    }

    #[test]
    fn request_ids_are_scoped_per_user() {
        let tracker = ActionTracker::new();
        let table = Uuid::new_v4();
        assert!(tracker.record(1, "req-1", table, ActionKind::Fold, 0));
        assert!(tracker.record(2, "req-1", table, ActionKind::Fold, 0));
    }

    #[test]
    fn empty_request_id_bypasses_dedup() {
        let tracker = ActionTracker::new();
        let table = Uuid::new_v4();
        assert!(tracker.record(1, "", table, ActionKind::Check, 0));
        assert!(tracker.record(1, "", table, ActionKind::Check, 0));
        assert!(tracker.is_empty());
    }

    #[test]
    fn gc_evicts_expired_entries() {
        let tracker = ActionTracker::with_retention(Duration::from_millis(0));
        let table = Uuid::new_v4();
        assert!(tracker.record(1, "req-1", table, ActionKind::Call, 0));
        std::thread::sleep(Duration::from_millis(5));
        tracker.gc();
        assert!(tracker.is_empty());
        // After eviction the id is accepted again; retention is the
        // replay-protection horizon, not a permanent log.
        assert!(tracker.record(1, "req-1", table, ActionKind::Call, 0));
    }
}
