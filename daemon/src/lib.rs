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

//! fidotest-daemon library — C3 (modem device), C4 (daemon loop) of
//! spec §4.3-§4.4.
//!
//! - `client` — HTTP client for the `fidotest-server` daemon-facing API
//! - `config` — single-device YAML configuration loading
//! - `conn` — `emsi::EmsiStream` wrapping a dialed modem call
//! - `daemon_loop` — the main pull/test/submit cycle
//! - `heartbeat` — the independent heartbeat task
//! - `modem` — the serial AT-command device driver

pub mod client;
pub mod config;
pub mod conn;
pub mod daemon_loop;
pub mod heartbeat;
pub mod modem;

pub use config::Config;
