//! HTTP wire DTOs for the daemon <-> server contract (spec §6).

use serde::{Deserialize, Serialize};

use crate::dial::DialResult;
use crate::protocol_details::ProtocolDetails;
use crate::queue_entry::QueueKey;

/// `GET /api/modem/nodes` query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct NodesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_true")]
    pub only_callable: bool,
}

fn default_limit() -> u32 {
    20
}
fn default_true() -> bool {
    true
}

/// A single node handed to the daemon by `GET /api/modem/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAssignment {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub conflict_sequence: u32,
    pub phone: String,
    pub phone_normalized: String,
    #[serde(default)]
    pub modem_flags: Vec<String>,
    pub priority: i32,
    pub retry_count: u32,
}

impl NodeAssignment {
    #[must_use]
    pub fn key(&self) -> QueueKey {
        QueueKey {
            zone: self.zone,
            net: self.net,
            node: self.node,
            conflict_sequence: self.conflict_sequence,
        }
    }
}

/// `GET /api/modem/nodes` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeAssignment>,
    /// Number of additional pending rows beyond this batch still assigned
    /// to the requesting caller.
    pub remaining: u64,
}

/// `POST /api/modem/in-progress` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProgressRequest {
    pub nodes: Vec<QueueKey>,
}

/// A single node's outcome in a `POST /api/modem/results` batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub key: QueueKey,
    pub success: bool,
    pub dial: Option<DialResult>,
    pub details: Option<ProtocolDetails>,
    pub address_valid: bool,
    pub banner: Option<String>,
    pub reason: Option<String>,
    pub retries: u32,
    pub duration_ms: u64,
}

/// `POST /api/modem/results` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsRequest {
    pub results: Vec<TestResult>,
}

/// `POST /api/modem/results` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub accepted: u32,
}

/// `POST /api/modem/heartbeat` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub modem_ready: bool,
    pub completed_count: u64,
    pub failed_count: u64,
    pub last_test_time: Option<u64>,
}

/// `POST /api/modem/release` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub nodes: Vec<QueueKey>,
    pub reason: String,
}

/// `POST /api/modem/release` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: u32,
}

/// A candidate node offered to queue population (spec §4.6's "Queue
/// population" job). Produced by an external nodelist feeder; nodelist
/// text parsing itself is out of scope here (spec §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateNode {
    pub zone: u16,
    pub net: u16,
    pub node: u16,
    pub conflict_sequence: u32,
    pub phone: String,
    pub phone_normalized: String,
    #[serde(default)]
    pub modem_flags: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub is_cm: bool,
    #[serde(default)]
    pub time_flags: Vec<String>,
}

/// `POST /api/modem/candidates` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatesRequest {
    pub nodes: Vec<CandidateNode>,
}

/// `POST /api/modem/candidates` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatesResponse {
    pub submitted: u32,
}

/// A generic `{"error": "..."}` body returned on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
