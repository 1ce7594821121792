//! Single-threaded background scheduler (spec §4.6, §5): one task owns
//! every `QueueStore` mutation so assignment stays race-free without a
//! database-level uniqueness constraint. HTTP handlers never mutate the
//! queue directly — they send a `SchedulerMsg` through the mailbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use fidotest_common::phone::prefix_matches;
use fidotest_common::{CallerStatus, QueueEntry, QueueKey, QueueStatus};

use crate::config::Config;
use crate::queue::QueueStore;

/// A node offered to the scheduler for assignment. Nodelist parsing itself
/// is out of scope (spec §1) — this is the minimal shape a feeder needs to
/// supply.
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub conflict_sequence: u32,
    pub phone: String,
    pub phone_normalized: String,
    pub modem_flags: Vec<String>,
    pub flags: Vec<String>,
    pub is_cm: bool,
    pub time_flags: Vec<String>,
}

/// Messages accepted by the scheduler's mailbox.
pub enum SchedulerMsg {
    Assign(NodeCandidate),
    Reassign(QueueKey),
    /// Upsert a caller's runtime status (on heartbeat).
    Heartbeat {
        caller_id: String,
        modem_ready: bool,
        completed_count: u64,
        failed_count: u64,
        last_test_time: Option<u64>,
        reply: oneshot::Sender<()>,
    },
    /// Feed candidate nodes for the queue-population job to Assign. Reply
    /// carries the number of candidates that were newly queued (duplicates
    /// already present are skipped, per spec §4.6's Assign duplicate check).
    PopulateCandidates {
        candidates: Vec<NodeCandidate>,
        reply: oneshot::Sender<u32>,
    },
    RunMaintenanceNow(oneshot::Sender<()>),
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Spawn the scheduler task, returning the mailbox sender. The task owns
/// `queue` and `caller_status` exclusively for writes; reads are shared
/// via `Arc<RwLock<_>>` elsewhere (e.g. the HTTP routes).
pub fn spawn(
    config: Arc<Config>,
    queue: QueueStore,
    caller_status: Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
) -> mpsc::Sender<SchedulerMsg> {
    let (tx, mut rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let orphan_interval = Duration::from_secs(config.modem_api.orphan_check_interval_secs);
        let mut ticker = tokio::time::interval(orphan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => handle_msg(&config, &queue, &caller_status, msg).await,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    run_maintenance(&config, &queue, &caller_status).await;
                }
            }
        }
    });

    tx
}

async fn handle_msg(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
    msg: SchedulerMsg,
) {
    match msg {
        SchedulerMsg::Assign(candidate) => {
            assign(config, queue, caller_status, candidate).await;
        }
        SchedulerMsg::Reassign(key) => {
            reassign(config, queue, caller_status, key).await;
        }
        SchedulerMsg::Heartbeat {
            caller_id,
            modem_ready,
            completed_count,
            failed_count,
            last_test_time,
            reply,
        } => {
            let mut status = caller_status.write().await;
            let entry = status
                .entry(caller_id.clone())
                .or_insert_with(|| CallerStatus::new_inactive(caller_id));
            entry.last_heartbeat = now_millis();
            entry.status = fidotest_common::CallerStatusKind::Active;
            entry.modem_ready = modem_ready;
            entry.completed_count = completed_count;
            entry.failed_count = failed_count;
            if last_test_time.is_some() {
                entry.last_test_time = last_test_time;
            }
            let _ = reply.send(());
        }
        SchedulerMsg::PopulateCandidates { candidates, reply } => {
            let queued = populate(config, queue, caller_status, candidates).await;
            let _ = reply.send(queued);
        }
        SchedulerMsg::RunMaintenanceNow(reply) => {
            run_maintenance(config, queue, caller_status).await;
            let _ = reply.send(());
        }
    }
}

/// Pick the highest-priority active caller whose prefix rule matches.
async fn pick_caller(
    config: &Arc<Config>,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
    phone_normalized: &str,
) -> Option<String> {
    let now = now_millis();
    let offline_threshold = config.modem_api.offline_threshold_secs * 1000;
    let status = caller_status.read().await;

    let mut callers: Vec<_> = config.modem_api.callers.iter().collect();
    callers.sort_by(|a, b| b.priority.cmp(&a.priority));

    for caller in callers {
        if !prefix_matches(caller.prefix_mode, &caller.prefixes, phone_normalized) {
            continue;
        }
        let active = status
            .get(&caller.caller_id)
            .is_some_and(|s| s.is_active(now, offline_threshold));
        if active {
            return Some(caller.caller_id.clone());
        }
    }
    None
}

/// Assign a candidate per spec §4.6. Returns `true` if a new row was
/// inserted (no-op duplicate or no-eligible-caller both return `false`).
async fn assign(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
    candidate: NodeCandidate,
) -> bool {
    let key = QueueKey {
        zone: candidate.zone,
        net: candidate.net,
        node: candidate.node,
        conflict_sequence: candidate.conflict_sequence,
    };
    if queue.contains(&key).await {
        return false;
    }

    let Some(caller_id) = pick_caller(config, caller_status, &candidate.phone_normalized).await
    else {
        warn!(
            zone = candidate.zone,
            net = candidate.net,
            node = candidate.node,
            phone = %candidate.phone_normalized,
            "no caller matches prefix rules and is active; node not queued"
        );
        return false;
    };

    let now = now_millis();
    let entry = QueueEntry {
        zone: candidate.zone,
        net: candidate.net,
        node: candidate.node,
        conflict_sequence: candidate.conflict_sequence,
        phone: candidate.phone,
        phone_normalized: candidate.phone_normalized,
        modem_flags: candidate.modem_flags,
        flags: candidate.flags,
        is_cm: candidate.is_cm,
        time_flags: candidate.time_flags,
        priority: 0,
        retry_count: 0,
        status: QueueStatus::Pending,
        assigned_to: caller_id,
        assigned_at: now,
        in_progress_since: 0,
        next_attempt_after: now,
        last_error: None,
        created_at: now,
        updated_at: now,
    };

    match queue.insert(entry).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "queue fault during assign");
            false
        }
    }
}

async fn reassign(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
    key: QueueKey,
) {
    let Some(row) = queue.get(&key).await else {
        return;
    };
    let Some(caller_id) = pick_caller(config, caller_status, &row.phone_normalized).await else {
        warn!(?key, "reassign found no eligible caller; leaving orphaned");
        return;
    };
    queue.reassign(&key, &caller_id).await;
}

/// Runs the three reclaim/reassignment jobs from spec §4.6's table,
/// serially, on the ticker (this function only ever runs on the scheduler
/// task). Queue population is the fourth job in that table, but it has no
/// candidate source of its own here — nodelist parsing is an external
/// collaborator (spec §1) — so it runs instead whenever candidates arrive
/// via `SchedulerMsg::PopulateCandidates` (see `populate` below).
async fn run_maintenance(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
) {
    orphan_sweep(config, queue, caller_status).await;
    stale_in_progress_reclaim(config, queue).await;
    orphan_recovery(config, queue, caller_status).await;
}

/// Orphan sweep: for each caller whose last_heartbeat is stale, reclaim
/// its pending+in_progress rows and reassign them.
async fn orphan_sweep(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
) {
    let now = now_millis();
    let offline_threshold = config.modem_api.offline_threshold_secs * 1000;
    let stale_callers: Vec<String> = {
        let status = caller_status.read().await;
        status
            .values()
            .filter(|s| !s.is_active(now, offline_threshold))
            .map(|s| s.caller_id.clone())
            .collect()
    };

    for caller_id in stale_callers {
        let rows = queue
            .rows_for_caller_with_status(&caller_id, &[QueueStatus::Pending, QueueStatus::InProgress])
            .await;
        for key in rows {
            queue.reset_to_pending(&key, 0, "orphan sweep: caller offline").await;
            reassign(config, queue, caller_status, key).await;
        }
    }
}

/// Stale-in-progress reclaim: rows stuck in_progress past the threshold.
async fn stale_in_progress_reclaim(config: &Arc<Config>, queue: &QueueStore) {
    let threshold_millis = config.modem_api.stale_in_progress_threshold_secs * 1000;
    let backoff_millis = config.modem_api.stale_reclaim_backoff_secs * 1000;
    let stale = queue.stale_in_progress(threshold_millis).await;
    for key in stale {
        queue.reset_to_pending(&key, backoff_millis, "stale: reclaimed").await;
        info!(?key, "reclaimed stale in-progress row");
    }
}

/// Orphan recovery: rows with no assigned caller at all.
async fn orphan_recovery(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
) {
    let orphans = queue.orphans().await;
    for key in orphans {
        reassign(config, queue, caller_status, key).await;
    }
}

/// Queue population: Assign every candidate not already present. The
/// candidate source (nodelist) is an external collaborator per spec §1.
/// Returns the number of candidates that were newly queued.
async fn populate(
    config: &Arc<Config>,
    queue: &QueueStore,
    caller_status: &Arc<tokio::sync::RwLock<std::collections::HashMap<String, CallerStatus>>>,
    candidates: Vec<NodeCandidate>,
) -> u32 {
    let existing = queue.all_keys().await;
    let mut queued = 0u32;
    for candidate in candidates {
        let key = QueueKey {
            zone: candidate.zone,
            net: candidate.net,
            node: candidate.node,
            conflict_sequence: candidate.conflict_sequence,
        };
        if existing.contains(&key) {
            continue;
        }
        if assign(config, queue, caller_status, candidate).await {
            queued += 1;
        }
    }
    queued
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(node: u16) -> NodeCandidate {
        NodeCandidate {
            zone: 1,
            net: 1,
            node,
            conflict_sequence: 0,
            phone: "+1-555-0100".to_string(),
            phone_normalized: "+15550100".to_string(),
            modem_flags: vec![],
            flags: vec![],
            is_cm: false,
            time_flags: vec![],
        }
    }

    #[tokio::test]
    async fn populate_assigns_new_candidates_and_skips_duplicates() {
        let mut config = Config::default();
        config.modem_api.callers.push(fidotest_common::CallerConfig {
            caller_id: "primary".to_string(),
            api_key_hash: "sha256:deadbeef".to_string(),
            priority: 10,
            prefix_mode: fidotest_common::PrefixMode::All,
            prefixes: vec![],
        });
        let config = Arc::new(config);
        let queue = QueueStore::new();
        let caller_status = Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::from([(
            "primary".to_string(),
            CallerStatus {
                last_heartbeat: now_millis(),
                ..CallerStatus::new_inactive("primary".to_string())
            },
        )])));

        let first_pass = populate(&config, &queue, &caller_status, vec![candidate(100)]).await;
        let second_pass = populate(&config, &queue, &caller_status, vec![candidate(100), candidate(200)]).await;

        assert_eq!(first_pass, 1, "one candidate, one active caller, one new row");
        assert_eq!(second_pass, 1, "100 is already queued; only 200 is new");
        assert_eq!(queue.all_keys().await.len(), 2);
    }
}
