//! Built-in supervisor that restarts the daemon on crash.
//!
//! `fidotest-daemon --supervisor` forks a plain `fidotest-daemon` (with the
//! same `--config`, and without `--supervisor`) and monitors it. On
//! abnormal exit the daemon is restarted with exponential backoff. A clean
//! exit (code 0, i.e. a graceful shutdown signal) stops the supervisor.
//! SIGINT/SIGTERM are forwarded to the child so an operator's Ctrl-C still
//! drives the daemon's idempotent release path (spec §4.4) instead of
//! just killing the supervisor.

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, warn};

use fidotest_daemon::config::SupervisorConfig;

/// Run the supervisor loop. Does not return unless the child exits cleanly.
pub async fn run_supervisor(config_path: Option<&Path>, sup_config: &SupervisorConfig) -> ! {
    let mut backoff = 1u64;
    let max_backoff = sup_config.max_backoff;
    let stable_threshold = Duration::from_secs(sup_config.stable_threshold);

    let exe = std::env::current_exe().expect("resolve own executable path");

    loop {
        let started = Instant::now();

        let mut cmd = Command::new(&exe);
        if let Some(p) = config_path {
            cmd.arg("--config").arg(p);
        }

        let mut child = cmd.spawn().expect("failed to spawn daemon process");
        let child_pid = child.id();
        info!("Supervisor: started daemon (pid {child_pid:?})");

        let fwd_pid = child_pid;
        let _signal_task = tokio::spawn(async move {
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("register SIGINT");
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("register SIGTERM");
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Supervisor: forwarding SIGINT to child");
                    if let Some(pid) = fwd_pid {
                        #[allow(clippy::cast_possible_wrap)]
                        unsafe { libc::kill(pid as i32, libc::SIGINT); }
                    }
                }
                _ = sigterm.recv() => {
                    info!("Supervisor: forwarding SIGTERM to child");
                    if let Some(pid) = fwd_pid {
                        #[allow(clippy::cast_possible_wrap)]
                        unsafe { libc::kill(pid as i32, libc::SIGTERM); }
                    }
                }
            }
        });

        let status = child.wait().await;
        let uptime = started.elapsed();

        match status {
            Ok(s) if s.success() => {
                info!("Daemon exited cleanly, supervisor stopping");
                std::process::exit(0);
            }
            Ok(s) => {
                warn!("Daemon exited: {s} (uptime {:.1}s), restarting in {backoff}s", uptime.as_secs_f64());
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = next_backoff(backoff, uptime, stable_threshold, max_backoff);
            }
            Err(e) => {
                error!("Daemon wait error: {e} (uptime {:.1}s), restarting in {backoff}s", uptime.as_secs_f64());
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = next_backoff(backoff, uptime, stable_threshold, max_backoff);
            }
        }
    }
}

fn next_backoff(backoff: u64, uptime: Duration, stable_threshold: Duration, max_backoff: u64) -> u64 {
    if uptime >= stable_threshold {
        1
    } else {
        (backoff * 2).min(max_backoff)
    }
}
