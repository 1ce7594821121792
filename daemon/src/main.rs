#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # fidotest-daemon
//!
//! Modem daemon for the FidoNet distributed testing fabric (spec §4.3,
//! §4.4): dials nodes assigned by `fidotest-server`, runs the EMSI
//! handshake over the modem's data-mode channel, and reports results back.
//!
//! Pass `--supervisor` to run under the built-in crash-restart supervisor
//! instead of directly.

mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use fidotest_daemon::client::ServerClient;
use fidotest_daemon::config::{Cli, Config};
use fidotest_daemon::daemon_loop::DaemonLoop;
use fidotest_daemon::heartbeat::{self, HeartbeatCounters};
use fidotest_daemon::modem::Modem;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if cli.supervisor {
        info!("fidotest-daemon supervisor starting");
        supervisor::run_supervisor(cli.config.as_deref(), &config.supervisor).await;
    }

    run_daemon(config).await;
}

async fn run_daemon(config: Config) {
    info!("fidotest-daemon v{} starting", env!("CARGO_PKG_VERSION"));
    info!("identity {} via {}", config.identity.address, config.modem.device);

    let modem = match Modem::open(
        &config.modem.device,
        config.modem.baud_rate,
        &config.modem.init,
        Duration::from_secs(config.timeouts.at_command_secs),
    ) {
        Ok(m) => m,
        Err(e) => {
            error!("failed to open modem {}: {e}", config.modem.device);
            std::process::exit(2);
        }
    };

    let client = Arc::new(ServerClient::new(config.api.url.clone(), config.api.key.clone()));
    let counters = Arc::new(HeartbeatCounters::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat_interval = Duration::from_secs(config.heartbeat.interval_secs);
    let heartbeat_handle = heartbeat::spawn(client.clone(), counters.clone(), heartbeat_interval, shutdown_rx.clone());

    let daemon_loop = match DaemonLoop::new(client, modem, config, counters) {
        Ok(d) => d,
        Err(e) => {
            error!("invalid identity.address: {e}");
            std::process::exit(1);
        }
    };

    let loop_handle = tokio::spawn(daemon_loop.run(shutdown_rx));

    wait_for_signal().await;
    info!("shutdown signal received, draining in-flight call and releasing assigned nodes");
    let _ = shutdown_tx.send(true);

    let _ = loop_handle.await;
    let _ = heartbeat_handle.await;
    info!("Goodbye");
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
