//! `POST /api/modem/candidates` — spec §4.6's "Queue population" job.
//!
//! Nodelist text parsing is an external collaborator (spec §1); this is
//! the intake boundary it feeds through. Each candidate not already in the
//! queue is Assigned per §4.6; duplicates are silently skipped.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tokio::sync::oneshot;

use fidotest_common::dto::{CandidatesRequest, CandidatesResponse};

use crate::scheduler::{NodeCandidate, SchedulerMsg};
use crate::state::AppState;

pub async fn submit_candidates(
    State(state): State<AppState>,
    Json(body): Json<CandidatesRequest>,
) -> axum::response::Response {
    if body.nodes.len() > state.config.modem_api.max_batch_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "batch exceeds max_batch_size"})),
        )
            .into_response();
    }

    let candidates = body
        .nodes
        .into_iter()
        .map(|n| NodeCandidate {
            zone: n.zone,
            net: n.net,
            node: n.node,
            conflict_sequence: n.conflict_sequence,
            phone: n.phone,
            phone_normalized: n.phone_normalized,
            modem_flags: n.modem_flags,
            flags: n.flags,
            is_cm: n.is_cm,
            time_flags: n.time_flags,
        })
        .collect();

    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = state
        .scheduler
        .send(SchedulerMsg::PopulateCandidates { candidates, reply: reply_tx })
        .await;
    let submitted = reply_rx.await.unwrap_or(0);

    Json(CandidatesResponse { submitted }).into_response()
}
