#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # fidotest-server
//!
//! HTTP API + queue maintenance for the FidoNet distributed testing fabric
//! (spec §4.6, §6). Modem daemons pull assigned nodes, report in-progress
//! and results, and heartbeat through this service; a single-threaded
//! scheduler owns every queue mutation.
//!
//! ## Subcommands
//!
//! - `fidotest-server serve` (default) — run the HTTP server
//! - `fidotest-server supervise` — run as supervisor: starts the server and
//!   restarts it on crash

mod supervisor;

use std::sync::Arc;

use axum::{middleware, routing::{get, post}, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use fidotest_server::{
    auth, config::Config, queue::QueueStore, rate_limit, routes, scheduler, state::AppState,
};

/// FidoNet testing fabric server: queue maintenance + daemon-facing HTTP API.
#[derive(Parser)]
#[command(name = "fidotest-server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        #[arg(long)]
        config: Option<String>,
    },
    /// Run as supervisor: starts the server and restarts it on crash.
    Supervise {
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Supervise { config }) => {
            run_supervisor_mode(config.as_deref()).await;
        }
        Some(Commands::Serve { config }) => {
            run_server(config.as_deref()).await;
        }
        None => {
            run_server(None).await;
        }
    }
}

async fn run_supervisor_mode(config_path: Option<&str>) -> ! {
    let config = Config::load(config_path);
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("fidotest-server supervisor starting");
    supervisor::run_supervisor(config_path, &config.supervisor).await
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            tracing::error!("Config error: {err}");
        }
        std::process::exit(1);
    }

    info!("fidotest-server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);
    info!(
        "{} configured caller(s)",
        config.modem_api.callers.len()
    );

    let config = Arc::new(config);
    let queue = QueueStore::new();
    let caller_status = fidotest_server::state::new_caller_status_table(&config);
    let scheduler_tx = scheduler::spawn(config.clone(), queue.clone(), caller_status.clone());
    let state = AppState::new(config.clone(), queue, scheduler_tx, caller_status);

    let public_routes = Router::new().route("/api/health", get(routes::health::health));

    let modem_routes = Router::new()
        .route("/api/modem/nodes", get(routes::nodes::get_nodes))
        .route("/api/modem/in-progress", post(routes::in_progress::mark_in_progress))
        .route("/api/modem/results", post(routes::results::submit_results))
        .route("/api/modem/heartbeat", post(routes::heartbeat::heartbeat))
        .route("/api/modem/release", post(routes::release::release))
        .route("/api/modem/candidates", post(routes::candidates::submit_candidates))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_caller,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let app = Router::new()
        .merge(public_routes)
        .merge(modem_routes)
        .with_state(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            state.config.server.max_connections,
        ));

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
    };

    if !config.modem_api.enabled {
        warn!("modem_api.enabled is false; server will only answer /api/health");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Goodbye");
}
