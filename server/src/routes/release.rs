//! `POST /api/modem/release` — spec §6: release nodes back to pending.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use fidotest_common::dto::{ReleaseRequest, ReleaseResponse};

use crate::state::AppState;

pub async fn release(
    State(state): State<AppState>,
    Json(body): Json<ReleaseRequest>,
) -> axum::response::Response {
    if body.nodes.len() > state.config.modem_api.max_batch_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "batch exceeds max_batch_size"})),
        )
            .into_response();
    }
    let released = state.queue.release(&body.nodes, &body.reason).await;
    Json(ReleaseResponse { released: released as u32 }).into_response()
}
