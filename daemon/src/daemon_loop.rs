//! C4 — the daemon's main loop (spec §4.4).
//!
//! One cycle: retry any nodes still unreleased from a prior cycle, pull a
//! batch, mark it in-progress, test each node sequentially through the
//! modem (spec §4.5), submit results, and release whatever didn't make it
//! into a submitted batch. Two tiers of "not yet resolved" state survive
//! across cycles on purpose: `in_progress_nodes` is this cycle's batch
//! before its outcome is known, `unreleased_nodes` is what's left after a
//! `Release` call itself failed and needs retrying next cycle.
//!
//! Shutdown is a single `tokio::sync::watch<bool>` — the same primitive
//! the teacher's tunnel client uses for its reconnect loop's exit signal —
//! so every waiter (the main loop's sleeps, the heartbeat task) observes
//! it exactly once and idempotently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use emsi::{run_test, SessionConfig, SessionIdentity};
use fidotest_common::dto::{NodeAssignment, TestResult};
use fidotest_common::{Address, DialResult, ProtocolDetails, QueueKey};

use crate::client::ServerClient;
use crate::config::Config;
use crate::conn::ModemConn;
use crate::heartbeat::HeartbeatCounters;
use crate::modem::Modem;

const MAX_SHUTDOWN_RELEASE_ATTEMPTS: u32 = 3;

/// Drives the C4 cycle against a single modem + server pair.
pub struct DaemonLoop {
    client: Arc<ServerClient>,
    modem: Modem,
    config: Config,
    counters: Arc<HeartbeatCounters>,
    identity: SessionIdentity,
    expected_address: Address,
}

impl DaemonLoop {
    pub fn new(client: Arc<ServerClient>, modem: Modem, config: Config, counters: Arc<HeartbeatCounters>) -> Result<Self, fidotest_common::address::AddressParseError> {
        let expected_address: Address = config.identity.address.parse()?;
        let identity = build_identity(&config, &expected_address);
        Ok(Self {
            client,
            modem,
            config,
            counters,
            identity,
            expected_address,
        })
    }

    /// Run cycles until `shutdown` reports `true`, then release whatever
    /// is still outstanding (spec §4.4's idempotent shutdown path).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut in_progress_nodes: Vec<QueueKey> = Vec::new();
        let mut unreleased_nodes: Vec<QueueKey> = Vec::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.retry_unreleased(&mut unreleased_nodes).await;

            let batch = match self.client.pull_nodes(self.config.polling.batch_size).await {
                Ok(resp) => resp.nodes,
                Err(e) => {
                    warn!("pull_nodes failed: {e}");
                    if self.sleep_or_shutdown(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                if self.sleep_or_shutdown(&mut shutdown).await {
                    break;
                }
                continue;
            }

            let keys: Vec<QueueKey> = batch.iter().map(NodeAssignment::key).collect();

            if let Err(e) = self.client.mark_in_progress(keys.clone()).await {
                warn!("mark_in_progress failed, will retry next cycle: {e}");
                if self.sleep_or_shutdown(&mut shutdown).await {
                    break;
                }
                continue;
            }
            in_progress_nodes = keys;

            let results = self.test_batch(&batch, &mut shutdown).await;

            match self.client.submit_results(results).await {
                Ok(resp) => {
                    info!("submitted {} result(s), server accepted {}", in_progress_nodes.len(), resp.accepted);
                    in_progress_nodes.clear();
                }
                Err(e) => {
                    warn!("submit_results failed: {e}, attempting release");
                    match self.client.release(in_progress_nodes.clone(), "submit_failed").await {
                        Ok(_) => in_progress_nodes.clear(),
                        Err(e2) => {
                            error!("release after submit failure also failed: {e2}, carrying {} node(s) to next cycle", in_progress_nodes.len());
                            unreleased_nodes.append(&mut in_progress_nodes);
                        }
                    }
                }
            }

            if self.sleep_or_shutdown(&mut shutdown).await {
                break;
            }
        }

        self.shutdown_release(in_progress_nodes, unreleased_nodes).await;
    }

    /// Step 1 of the cycle: retry nodes left over from a prior cycle's
    /// failed release.
    async fn retry_unreleased(&self, unreleased_nodes: &mut Vec<QueueKey>) {
        if unreleased_nodes.is_empty() {
            return;
        }
        match self.client.release(unreleased_nodes.clone(), "retry").await {
            Ok(_) => {
                info!("released {} previously-stuck node(s)", unreleased_nodes.len());
                unreleased_nodes.clear();
            }
            Err(e) => {
                warn!("retry-release of {} stuck node(s) failed again: {e}", unreleased_nodes.len());
            }
        }
    }

    /// Step 4: test every node in the batch sequentially, respecting the
    /// inter-call delay and cancellation between calls (spec §4.4, §5).
    async fn test_batch(&self, batch: &[NodeAssignment], shutdown: &mut watch::Receiver<bool>) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(batch.len());
        for (i, node) in batch.iter().enumerate() {
            if *shutdown.borrow() {
                break;
            }
            self.counters.set_modem_ready(true);
            let result = self.test_node(node).await;
            if result.success {
                self.counters.record_completed();
            } else {
                self.counters.record_failed();
            }
            results.push(result);

            let is_last = i + 1 == batch.len();
            if !is_last {
                let delay = Duration::from_secs(self.config.polling.inter_call_delay_secs);
                if wait_or_shutdown(shutdown, delay).await {
                    break;
                }
            }
        }
        results
    }

    /// Step 4 for a single node (spec §4.5): dial, run the handshake,
    /// hang up (or reset on a failed hangup), and shape the result.
    async fn test_node(&self, node: &NodeAssignment) -> TestResult {
        let timeouts = &self.config.timeouts;
        let (dial, channels) = self
            .modem
            .dial(
                &node.phone_normalized,
                &self.config.modem.dial_prefix,
                Duration::from_secs(timeouts.dial_secs),
                Duration::from_secs(timeouts.carrier_secs),
            )
            .await;

        let Some(channels) = channels else {
            return dial_failure_result(node, &dial);
        };

        let conn = ModemConn::new(self.modem.clone(), channels, self.config.modem.hangup_method);
        let mut session_cfg = SessionConfig::default();
        session_cfg.master_timeout = Duration::from_secs(timeouts.emsi_secs);

        let (_stream, outcome) = run_test(conn, &session_cfg, &self.identity, &self.expected_address).await;

        if outcome.hangup_failed {
            warn!(
                "hangup failed after testing {}:{}/{}, resetting modem",
                node.zone, node.net, node.node
            );
            if let Err(e) = self.modem.reset().await {
                error!("modem reset after failed hangup also failed: {e}");
            }
        }

        TestResult {
            key: node.key(),
            success: outcome.success,
            dial: Some(dial.clone()),
            details: dial.success.then_some(ProtocolDetails::Modem {
                connect_speed: dial.connect_speed,
                protocol: dial.protocol.clone(),
            }),
            address_valid: outcome.address_valid,
            banner: (!outcome.banner.is_empty()).then_some(outcome.banner),
            reason: outcome.reason,
            retries: outcome.retries,
            duration_ms: outcome.duration.as_millis() as u64,
        }
    }

    /// Idempotent shutdown release (spec §4.4): union in-progress and
    /// unreleased nodes, up to three tries with exponential backoff, log
    /// CRITICAL and rely on the server's stale-reclaim if all fail.
    async fn shutdown_release(&self, in_progress_nodes: Vec<QueueKey>, unreleased_nodes: Vec<QueueKey>) {
        let mut seen: std::collections::HashSet<QueueKey> = std::collections::HashSet::new();
        let mut pending = Vec::new();
        for key in unreleased_nodes.into_iter().chain(in_progress_nodes) {
            if seen.insert(key) {
                pending.push(key);
            }
        }

        if pending.is_empty() {
            info!("shutdown: nothing to release");
            return;
        }

        let mut backoff = Duration::from_secs(2);
        for attempt in 1..=MAX_SHUTDOWN_RELEASE_ATTEMPTS {
            match self.client.release(pending.clone(), "shutdown").await {
                Ok(resp) => {
                    info!("shutdown: released {} node(s) on attempt {attempt}", resp.released);
                    return;
                }
                Err(e) => {
                    warn!("shutdown: release attempt {attempt}/{MAX_SHUTDOWN_RELEASE_ATTEMPTS} failed: {e}");
                    if attempt < MAX_SHUTDOWN_RELEASE_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        error!(
            "CRITICAL: failed to release {} node(s) after {MAX_SHUTDOWN_RELEASE_ATTEMPTS} attempts; \
             relying on the server's stale in-progress reclaim",
            pending.len()
        );
    }

    /// Sleep for `polling.interval_secs`, cancellable by shutdown.
    async fn sleep_or_shutdown(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        wait_or_shutdown(shutdown, Duration::from_secs(self.config.polling.interval_secs)).await
    }
}

/// Sleep for `delay` unless `shutdown` fires first. Returns `true` if the
/// caller should stop looping.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        result = shutdown.changed() => result.is_err() || *shutdown.borrow(),
    }
}

fn dial_failure_result(node: &NodeAssignment, dial: &DialResult) -> TestResult {
    TestResult {
        key: node.key(),
        success: false,
        dial: Some(dial.clone()),
        details: None,
        address_valid: false,
        banner: None,
        reason: dial.failure_reason.as_ref().map(std::string::ToString::to_string),
        retries: 0,
        duration_ms: dial.dial_duration_ms,
    }
}

/// Build the session identity this daemon presents during EMSI (spec
/// §4.2's "Build EMSI_DAT from the session identity").
fn build_identity(config: &Config, address: &Address) -> SessionIdentity {
    emsi::EmsiData {
        addresses: vec![address.clone()],
        password: String::new(),
        link_codes: vec!["8N1".to_string()],
        compat_codes: vec!["NCP".to_string()],
        mailer_product_code: "FE".to_string(),
        mailer_name: "fidotest-daemon".to_string(),
        mailer_version: env!("CARGO_PKG_VERSION").to_string(),
        mailer_serial: "00000000".to_string(),
        ident: emsi::IdentRecord {
            system: config.identity.system_name.clone(),
            location: config.identity.location.clone(),
            sysop: config.identity.sysop.clone(),
            phone: "-Unpublished-".to_string(),
            speed: config.modem.baud_rate.to_string(),
            flags: vec![],
        },
        trx: None,
        moh: None,
        traf: None,
        ohfr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_failure_result_carries_no_protocol_details() {
        let node = NodeAssignment {
            zone: 2,
            net: 5001,
            node: 100,
            conflict_sequence: 0,
            phone: "+1-555-0100".to_string(),
            phone_normalized: "15550100".to_string(),
            modem_flags: vec![],
            priority: 0,
            retry_count: 0,
        };
        let dial = DialResult::failure(fidotest_common::DialFailureReason::Busy, 1200);
        let result = dial_failure_result(&node, &dial);
        assert!(!result.success);
        assert!(result.details.is_none());
        assert_eq!(result.reason, Some("BUSY".to_string()));
    }
}
