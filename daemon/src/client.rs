//! HTTP client for the `fidotest-server` REST endpoints (spec §6).
//!
//! [`ServerClient`] wraps `reqwest::Client` and provides one typed method
//! per daemon-facing endpoint. All endpoints except `/api/health` use
//! Bearer token authentication.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for an `error` field in the JSON body. If
//! parsing fails, the raw response body is returned as the error message.

use fidotest_common::dto::{
    HeartbeatRequest, InProgressRequest, NodesResponse, ReleaseRequest, ReleaseResponse,
    ResultsRequest, ResultsResponse, TestResult,
};
use fidotest_common::QueueKey;

/// HTTP client for a single `fidotest-server` deployment.
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ServerClient {
    /// Create a new client for the server at `base_url`.
    pub fn new(base_url: String, api_key: String) -> Self {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::HeaderName::from_static("x-fidotest-client"),
            reqwest::header::HeaderValue::from_static("daemon"),
        );
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .expect("Failed to build HTTP client");
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// `GET /api/modem/nodes` — pull up to `limit` pending nodes assigned
    /// to this caller (spec §4.4 step 2).
    pub async fn pull_nodes(&self, limit: u32) -> Result<NodesResponse, ClientError> {
        let resp = self
            .http
            .get(format!("{}/api/modem/nodes", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("limit", limit.to_string()), ("only_callable", "true".to_string())])
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_typed(resp).await
    }

    /// `POST /api/modem/in-progress` — mark a batch as in-progress (spec
    /// §4.4 step 3). Idempotent.
    pub async fn mark_in_progress(&self, nodes: Vec<QueueKey>) -> Result<(), ClientError> {
        let body = InProgressRequest { nodes };
        let resp = self
            .http
            .post(format!("{}/api/modem/in-progress", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_unit(resp).await
    }

    /// `POST /api/modem/results` — submit a batch of test outcomes (spec
    /// §4.4 step 5).
    pub async fn submit_results(&self, results: Vec<TestResult>) -> Result<ResultsResponse, ClientError> {
        let body = ResultsRequest { results };
        let resp = self
            .http
            .post(format!("{}/api/modem/results", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_typed(resp).await
    }

    /// `POST /api/modem/heartbeat` — post status + counters (spec §4.4's
    /// heartbeat goroutine).
    pub async fn heartbeat(&self, body: &HeartbeatRequest) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/modem/heartbeat", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_unit(resp).await
    }

    /// `POST /api/modem/release` — release nodes back to pending (spec
    /// §4.4 steps 1 and shutdown).
    pub async fn release(&self, nodes: Vec<QueueKey>, reason: &str) -> Result<ReleaseResponse, ClientError> {
        let body = ReleaseRequest {
            nodes,
            reason: reason.to_string(),
        };
        let resp = self
            .http
            .post(format!("{}/api/modem/release", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_typed(resp).await
    }

    async fn handle_unit(resp: reqwest::Response) -> Result<(), ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ClientError::Request)?;
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::api_error(status.as_u16(), &body))
        }
    }

    async fn handle_typed<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ClientError::Request)?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map_err(|e| ClientError::Parse(format!("invalid JSON from server: {e}")))
        } else {
            Err(Self::api_error(status.as_u16(), &body))
        }
    }

    fn api_error(status: u16, body: &str) -> ClientError {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or_else(|| body.to_string());
        ClientError::Api { status, message }
    }
}

/// Errors returned by [`ServerClient`] methods (spec §7's taxonomy,
/// restricted to what an HTTP call against the server can raise).
#[derive(Debug)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    Request(reqwest::Error),
    /// The server returned a non-2xx HTTP status.
    Api { status: u16, message: String },
    /// The response body was not valid JSON.
    Parse(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {e}"),
            ClientError::Api { status, message } => {
                write!(f, "server error (HTTP {status}): {message}")
            }
            ClientError::Parse(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}
