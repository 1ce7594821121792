//! Shared application state passed to every handler via Axum's `State` extractor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};

use fidotest_common::CallerStatus;

use crate::config::Config;
use crate::queue::QueueStore;
use crate::rate_limit::RateLimiter;
use crate::scheduler::SchedulerMsg;

/// Shared application state for the fidotest server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The queue's backing store (spec §3).
    pub queue: QueueStore,
    /// Mailbox into the single-threaded scheduler task (spec §4.6).
    pub scheduler: mpsc::Sender<SchedulerMsg>,
    /// Last-known-good runtime status per caller, upserted on heartbeat.
    pub caller_status: Arc<RwLock<HashMap<String, CallerStatus>>>,
    /// Per-caller token buckets (spec §6's rate limits).
    pub rate_limiter: RateLimiter,
}

/// Seeds a caller-status table with one inactive row per configured caller.
/// Built before the scheduler task spawns, since both the scheduler and
/// `AppState` need a handle to the same table.
#[must_use]
pub fn new_caller_status_table(config: &Config) -> Arc<RwLock<HashMap<String, CallerStatus>>> {
    let mut caller_status = HashMap::new();
    for caller in &config.modem_api.callers {
        caller_status.insert(
            caller.caller_id.clone(),
            CallerStatus::new_inactive(caller.caller_id.clone()),
        );
    }
    Arc::new(RwLock::new(caller_status))
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        queue: QueueStore,
        scheduler: mpsc::Sender<SchedulerMsg>,
        caller_status: Arc<RwLock<HashMap<String, CallerStatus>>>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.modem_api.rate_limits.clone());
        Self {
            config,
            start_time: Instant::now(),
            queue,
            scheduler,
            caller_status,
            rate_limiter,
        }
    }
}
