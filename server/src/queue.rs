//! `QueueStore` — the abstraction spec §1 puts the real backing database
//! behind ("SQL/columnar storage tables beyond what the queue needs" is an
//! external collaborator). This module ships the in-memory reference
//! implementation this repo tests against; a real deployment backs the
//! trait with Postgres or similar.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use fidotest_common::{QueueEntry, QueueKey, QueueStatus};

/// Errors raised by queue mutations (spec §7's `QueueFault`: "logged, skip
/// the node, never crash scheduler").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Duplicate(QueueKey),
    NotFound(QueueKey),
    UnknownCaller(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Duplicate(k) => write!(f, "duplicate queue entry: {k:?}"),
            QueueError::NotFound(k) => write!(f, "queue entry not found: {k:?}"),
            QueueError::UnknownCaller(c) => write!(f, "unknown caller: {c}"),
        }
    }
}

impl std::error::Error for QueueError {}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// In-memory reference store, enforcing invariants 1-3 from spec §3 on
/// every mutation:
///
/// 1. `(zone, net, node, conflict_sequence)` is unique.
/// 2. `assigned_to` is empty or a known caller.
/// 3. `status == InProgress ⟺ in_progress_since > 0`.
#[derive(Clone, Default)]
pub struct QueueStore {
    rows: Arc<RwLock<HashMap<QueueKey, QueueEntry>>>,
}

impl QueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a brand-new row. Returns `Err(Duplicate)` if the identity
    /// already exists (spec §4.6 Assign step 1).
    pub async fn insert(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let key = entry.key();
        let mut rows = self.rows.write().await;
        if rows.contains_key(&key) {
            return Err(QueueError::Duplicate(key));
        }
        rows.insert(key, entry);
        Ok(())
    }

    pub async fn get(&self, key: &QueueKey) -> Option<QueueEntry> {
        self.rows.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &QueueKey) -> bool {
        self.rows.read().await.contains_key(key)
    }

    /// Rows pending and assigned to `caller_id`, newest-priority first.
    pub async fn pending_for_caller(&self, caller_id: &str, limit: usize) -> (Vec<QueueEntry>, u64) {
        let rows = self.rows.read().await;
        let now = now_millis();
        let mut matching: Vec<QueueEntry> = rows
            .values()
            .filter(|e| {
                e.status == QueueStatus::Pending
                    && e.assigned_to == caller_id
                    && e.next_attempt_after <= now
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        let remaining = matching.len().saturating_sub(limit) as u64;
        matching.truncate(limit);
        (matching, remaining)
    }

    /// Mark a batch in-progress (spec §6 `POST /api/modem/in-progress`,
    /// idempotent: marking an already-in-progress row is a no-op).
    pub async fn mark_in_progress(&self, keys: &[QueueKey]) -> usize {
        let mut rows = self.rows.write().await;
        let now = now_millis();
        let mut marked = 0;
        for key in keys {
            if let Some(entry) = rows.get_mut(key) {
                if entry.status != QueueStatus::InProgress {
                    entry.status = QueueStatus::InProgress;
                    entry.in_progress_since = now;
                    marked += 1;
                }
                entry.updated_at = now;
            }
        }
        marked
    }

    /// Record a test result (spec §6 `POST /api/modem/results`).
    pub async fn record_result(
        &self,
        key: &QueueKey,
        success: bool,
        reason: Option<String>,
        retry_backoff_secs: u64,
    ) -> Result<(), QueueError> {
        let mut rows = self.rows.write().await;
        let entry = rows.get_mut(key).ok_or(QueueError::NotFound(*key))?;
        let now = now_millis();
        entry.in_progress_since = 0;
        entry.last_error = reason;
        entry.updated_at = now;
        if success {
            entry.status = QueueStatus::Completed;
        } else {
            entry.status = QueueStatus::Failed;
            entry.retry_count += 1;
            entry.next_attempt_after = now + retry_backoff_secs * 1000;
        }
        Ok(())
    }

    /// Release a batch back to pending (spec §6 `POST /api/modem/release`,
    /// and §4.4's retry-unreleased step). `assigned_to` is left unchanged.
    pub async fn release(&self, keys: &[QueueKey], reason: &str) -> usize {
        let mut rows = self.rows.write().await;
        let mut released = 0;
        for key in keys {
            if let Some(entry) = rows.get_mut(key) {
                entry.status = QueueStatus::Pending;
                entry.in_progress_since = 0;
                entry.last_error = Some(reason.to_string());
                entry.updated_at = now_millis();
                released += 1;
            }
        }
        released
    }

    /// Find rows assigned to `caller_id` with the given status, for the
    /// orphan sweep (spec §4.6).
    pub async fn rows_for_caller_with_status(
        &self,
        caller_id: &str,
        statuses: &[QueueStatus],
    ) -> Vec<QueueKey> {
        self.rows
            .read()
            .await
            .values()
            .filter(|e| e.assigned_to == caller_id && statuses.contains(&e.status))
            .map(QueueEntry::key)
            .collect()
    }

    /// Find stale in-progress rows (spec §4.6's "Stale-in-progress reclaim").
    pub async fn stale_in_progress(&self, stale_threshold_millis: u64) -> Vec<QueueKey> {
        let rows = self.rows.read().await;
        let now = now_millis();
        rows.values()
            .filter(|e| {
                e.status == QueueStatus::InProgress
                    && e.in_progress_since > 0
                    && now.saturating_sub(e.in_progress_since) > stale_threshold_millis
            })
            .map(QueueEntry::key)
            .collect()
    }

    /// Find orphaned rows (`assigned_to` empty, pending or in-progress).
    pub async fn orphans(&self) -> Vec<QueueKey> {
        self.rows
            .read()
            .await
            .values()
            .filter(|e| {
                e.assigned_to.is_empty()
                    && matches!(e.status, QueueStatus::Pending | QueueStatus::InProgress)
            })
            .map(QueueEntry::key)
            .collect()
    }

    /// Reset a row to pending with a fresh `retry_count`/backoff (used by
    /// both the orphan sweep and stale reclaim).
    pub async fn reset_to_pending(&self, key: &QueueKey, backoff_millis: u64, last_error: &str) {
        let mut rows = self.rows.write().await;
        if let Some(entry) = rows.get_mut(key) {
            entry.status = QueueStatus::Pending;
            entry.in_progress_since = 0;
            entry.retry_count += 1;
            entry.next_attempt_after = now_millis() + backoff_millis;
            entry.last_error = Some(last_error.to_string());
            entry.updated_at = now_millis();
        }
    }

    /// Update `assigned_to` in place (spec §4.6's Reassign).
    pub async fn reassign(&self, key: &QueueKey, caller_id: &str) {
        let mut rows = self.rows.write().await;
        if let Some(entry) = rows.get_mut(key) {
            entry.assigned_to = caller_id.to_string();
            entry.assigned_at = now_millis();
            entry.updated_at = now_millis();
        }
    }

    /// All keys currently known, for the queue-population job to filter
    /// against new nodelist entries.
    pub async fn all_keys(&self) -> std::collections::HashSet<QueueKey> {
        self.rows.read().await.keys().copied().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(key: QueueKey, assigned_to: &str) -> QueueEntry {
        QueueEntry {
            zone: key.zone,
            net: key.net,
            node: key.node,
            conflict_sequence: key.conflict_sequence,
            phone: "+1 495 123 4567".into(),
            phone_normalized: "+14951234567".into(),
            modem_flags: vec![],
            flags: vec![],
            is_cm: false,
            time_flags: vec![],
            priority: 10,
            retry_count: 0,
            status: QueueStatus::Pending,
            assigned_to: assigned_to.to_string(),
            assigned_at: 0,
            in_progress_since: 0,
            next_attempt_after: 0,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = QueueStore::new();
        let key = QueueKey { zone: 2, net: 5001, node: 100, conflict_sequence: 0 };
        store.insert(sample(key, "ru")).await.unwrap();
        assert_eq!(store.insert(sample(key, "ru")).await, Err(QueueError::Duplicate(key)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn mark_in_progress_is_idempotent() {
        let store = QueueStore::new();
        let key = QueueKey { zone: 2, net: 5001, node: 100, conflict_sequence: 0 };
        store.insert(sample(key, "ru")).await.unwrap();
        assert_eq!(store.mark_in_progress(&[key]).await, 1);
        assert_eq!(store.mark_in_progress(&[key]).await, 0);
        let row = store.get(&key).await.unwrap();
        assert_eq!(row.status, QueueStatus::InProgress);
        assert!(row.in_progress_since > 0);
    }

    #[tokio::test]
    async fn release_preserves_assigned_to() {
        let store = QueueStore::new();
        let key = QueueKey { zone: 2, net: 5001, node: 100, conflict_sequence: 0 };
        store.insert(sample(key, "ru")).await.unwrap();
        store.mark_in_progress(&[key]).await;
        store.release(&[key], "retry").await;
        let row = store.get(&key).await.unwrap();
        assert_eq!(row.status, QueueStatus::Pending);
        assert_eq!(row.assigned_to, "ru");
        assert_eq!(row.in_progress_since, 0);
    }
}
