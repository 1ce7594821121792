//! Server-side IP test runner (spec §4.5): dials a node's IP transport
//! directly over TCP instead of through a modem, then runs the same EMSI
//! session the daemon does.
//!
//! Node selection (which nodes get IP-tested, on what schedule) is out of
//! scope per spec §1 — this module only exposes the callable unit an
//! external scheduler/collaborator would invoke.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use emsi::{run_test, SessionConfig, SessionIdentity, TestOutcome};
use fidotest_common::Address;

/// Errors connecting to a node's IP transport before the EMSI session
/// even begins.
#[derive(Debug, Clone)]
pub enum ConnectError {
    Timeout,
    Io(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Timeout => write!(f, "connect timeout"),
            ConnectError::Io(e) => write!(f, "connect error: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Opens a TCP connection to `host:port` and runs an EMSI test against it,
/// returning the outcome. `expected_address` validates the node identity
/// the peer reports in its EMSI_DAT (spec §4.5 step 4).
pub async fn run_ip_test(
    expected_address: &Address,
    host: &str,
    port: u16,
    identity: &SessionIdentity,
    cfg: &SessionConfig,
    connect_timeout: Duration,
) -> Result<TestOutcome, ConnectError> {
    let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| ConnectError::Io(e.to_string()))?;

    let (_stream, outcome) = run_test(stream, cfg, identity, expected_address).await;
    Ok(outcome)
}
