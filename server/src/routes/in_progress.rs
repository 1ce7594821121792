//! `POST /api/modem/in-progress` — spec §6: mark listed identities as
//! in_progress, idempotently.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use fidotest_common::dto::InProgressRequest;

use crate::state::AppState;

pub async fn mark_in_progress(
    State(state): State<AppState>,
    Json(body): Json<InProgressRequest>,
) -> axum::response::Response {
    if body.nodes.len() > state.config.modem_api.max_batch_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "batch exceeds max_batch_size"})),
        )
            .into_response();
    }
    let marked = state.queue.mark_in_progress(&body.nodes).await;
    Json(json!({ "marked": marked })).into_response()
}
