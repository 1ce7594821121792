#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! fidotest-server library — C5 (assignment + queue maintenance) and the
//! HTTP API of spec §6.
//!
//! - `auth` — bearer-token-to-caller-id resolution middleware
//! - `config` — YAML configuration loading
//! - `iptest` — server-side IP test runner (shared `emsi::runner` path)
//! - `queue` — the queue store and its invariants
//! - `rate_limit` — per-caller token-bucket middleware
//! - `routes` — REST API route handlers
//! - `scheduler` — the single-threaded background scheduler

pub mod auth;
pub mod config;
pub mod iptest;
pub mod queue;
pub mod rate_limit;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use config::Config;
pub use state::AppState;
