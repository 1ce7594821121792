//! Queue row, caller config, and caller status (spec §3, §6).

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A queue row's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single queued node under test (spec §3's "Queue Entry").
///
/// Identity is `(zone, net, node, conflict_sequence)` — invariant 1 of §3
/// requires this tuple be unique within the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    /// Disambiguates re-used (zone,net,node) triples across nodelist churn.
    pub conflict_sequence: u32,

    pub phone: String,
    pub phone_normalized: String,
    #[serde(default)]
    pub modem_flags: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub is_cm: bool,
    #[serde(default)]
    pub time_flags: Vec<String>,

    pub priority: i32,
    #[serde(default)]
    pub retry_count: u32,
    pub status: QueueStatus,
    /// Caller id, or empty string for an orphan (invariant 2).
    #[serde(default)]
    pub assigned_to: String,
    /// Epoch millis, 0 if never assigned.
    #[serde(default)]
    pub assigned_at: u64,
    /// Epoch millis; 0 iff status != InProgress (invariant 3).
    #[serde(default)]
    pub in_progress_since: u64,
    /// Epoch millis after which this row becomes eligible again.
    pub next_attempt_after: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Identity tuple used as the queue's uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub conflict_sequence: u32,
}

impl QueueEntry {
    #[must_use]
    pub fn key(&self) -> QueueKey {
        QueueKey {
            zone: self.zone,
            net: self.net,
            node: self.node,
            conflict_sequence: self.conflict_sequence,
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        Address::new(self.zone, self.net, self.node, 0)
    }

    /// Invariant 3: `status == InProgress` iff `in_progress_since > 0`.
    #[must_use]
    pub fn in_progress_invariant_holds(&self) -> bool {
        (self.status == QueueStatus::InProgress) == (self.in_progress_since > 0)
    }

    /// Invariant 2: assigned_to is empty (orphan) or a known caller.
    #[must_use]
    pub fn assignment_invariant_holds(&self, known_callers: &[String]) -> bool {
        self.assigned_to.is_empty() || known_callers.iter().any(|c| c == &self.assigned_to)
    }
}

/// How a caller's configured prefixes are interpreted (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixMode {
    Include,
    Exclude,
    All,
}

/// A configured modem daemon ("caller" in reference-mailer vocabulary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerConfig {
    pub caller_id: String,
    /// `sha256:<hex>` — never a raw key.
    pub api_key_hash: String,
    pub priority: i32,
    pub prefix_mode: PrefixMode,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// Runtime/operational status of a caller (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerStatusKind {
    Active,
    Inactive,
    Maintenance,
}

/// Last-known-good runtime state for a caller, upserted on heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerStatus {
    pub caller_id: String,
    /// Epoch millis of the most recent heartbeat.
    pub last_heartbeat: u64,
    pub status: CallerStatusKind,
    pub modem_ready: bool,
    pub completed_count: u64,
    pub failed_count: u64,
    /// Epoch millis of the most recently completed test, if any.
    pub last_test_time: Option<u64>,
}

impl CallerStatus {
    #[must_use]
    pub fn new_inactive(caller_id: String) -> Self {
        Self {
            caller_id,
            last_heartbeat: 0,
            status: CallerStatusKind::Inactive,
            modem_ready: false,
            completed_count: 0,
            failed_count: 0,
            last_test_time: None,
        }
    }

    /// Is this caller considered reachable right now, per §4.6's Assign
    /// step 3: `last_heartbeat >= now - offline_threshold`.
    #[must_use]
    pub fn is_active(&self, now_millis: u64, offline_threshold_millis: u64) -> bool {
        self.status != CallerStatusKind::Maintenance
            && now_millis.saturating_sub(self.last_heartbeat) < offline_threshold_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(status: QueueStatus, in_progress_since: u64) -> QueueEntry {
        QueueEntry {
            zone: 2,
            net: 5001,
            node: 100,
            conflict_sequence: 0,
            phone: "+1 495 123 4567".into(),
            phone_normalized: "+14951234567".into(),
            modem_flags: vec![],
            flags: vec![],
            is_cm: false,
            time_flags: vec![],
            priority: 10,
            retry_count: 0,
            status,
            assigned_to: String::new(),
            assigned_at: 0,
            in_progress_since,
            next_attempt_after: 0,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn in_progress_invariant_detects_violation() {
        assert!(sample_entry(QueueStatus::InProgress, 100).in_progress_invariant_holds());
        assert!(!sample_entry(QueueStatus::InProgress, 0).in_progress_invariant_holds());
        assert!(sample_entry(QueueStatus::Pending, 0).in_progress_invariant_holds());
        assert!(!sample_entry(QueueStatus::Pending, 100).in_progress_invariant_holds());
    }

    #[test]
    fn assignment_invariant_allows_orphan_or_known_caller() {
        let mut e = sample_entry(QueueStatus::Pending, 0);
        assert!(e.assignment_invariant_holds(&["ru".into()]));
        e.assigned_to = "ru".into();
        assert!(e.assignment_invariant_holds(&["ru".into(), "eu".into()]));
        assert!(!e.assignment_invariant_holds(&["eu".into()]));
    }

    #[test]
    fn caller_status_active_threshold() {
        let mut status = CallerStatus::new_inactive("ru".into());
        status.last_heartbeat = 1_000;
        status.status = CallerStatusKind::Active;
        assert!(status.is_active(1_500, 1_000));
        assert!(!status.is_active(3_000, 1_000));
    }
}
