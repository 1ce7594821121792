//! The independent heartbeat task (spec §4.4: "a heartbeat goroutine posts
//! status/modem_ready/counters every `heartbeat_interval`, regardless of
//! where the main loop is in its cycle").
//!
//! Counters are atomics rather than state shared through a mutex with the
//! main loop, the same design the teacher's `TunnelStats` uses to let an
//! observability task read hot counters without contending with the
//! connection it's reporting on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::warn;

use fidotest_common::dto::HeartbeatRequest;

use crate::client::ServerClient;

/// Hot counters the main loop updates and the heartbeat task reads.
#[derive(Default)]
pub struct HeartbeatCounters {
    modem_ready: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    /// Unix seconds of the last completed test; 0 means "never".
    last_test_time: AtomicU64,
}

impl HeartbeatCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_modem_ready(&self, ready: bool) {
        self.modem_ready.store(ready, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.touch_last_test_time();
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch_last_test_time();
    }

    fn touch_last_test_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_test_time.store(now, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HeartbeatRequest {
        let last_test_time = match self.last_test_time.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(secs),
        };
        HeartbeatRequest {
            modem_ready: self.modem_ready.load(Ordering::Relaxed),
            completed_count: self.completed.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
            last_test_time,
        }
    }
}

/// Spawn the heartbeat task. Stops the tick loop once `shutdown` reports
/// `true`, but doesn't itself send a final heartbeat — the daemon loop's
/// shutdown path handles release, and a stale heartbeat is harmless
/// (spec §4.6's stale-reclaim covers a daemon that stops heartbeating).
pub fn spawn(
    client: Arc<ServerClient>,
    counters: Arc<HeartbeatCounters>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let body = counters.snapshot();
                    if let Err(e) = client.heartbeat(&body).await {
                        warn!("heartbeat failed: {e}");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_none_before_any_test() {
        let counters = HeartbeatCounters::new();
        counters.set_modem_ready(true);
        let snap = counters.snapshot();
        assert!(snap.modem_ready);
        assert_eq!(snap.completed_count, 0);
        assert_eq!(snap.last_test_time, None);
    }

    #[test]
    fn snapshot_reflects_completed_and_failed_counts() {
        let counters = HeartbeatCounters::new();
        counters.record_completed();
        counters.record_completed();
        counters.record_failed();
        let snap = counters.snapshot();
        assert_eq!(snap.completed_count, 2);
        assert_eq!(snap.failed_count, 1);
        assert!(snap.last_test_time.is_some());
    }
}
