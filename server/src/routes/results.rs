//! `POST /api/modem/results` — spec §6: submit a batch of test results;
//! server schedules retry with backoff on failure.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use fidotest_common::dto::{ResultsRequest, ResultsResponse};

use crate::state::AppState;

/// Backoff applied to a failed test before it becomes eligible again.
/// Grows with `retry_count` (read back from the row after the increment),
/// capped at ten minutes.
fn backoff_secs(retry_count: u32) -> u64 {
    (30u64.saturating_mul(u64::from(retry_count).max(1))).min(600)
}

pub async fn submit_results(
    State(state): State<AppState>,
    Json(body): Json<ResultsRequest>,
) -> axum::response::Response {
    if body.results.len() > state.config.modem_api.max_batch_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "batch exceeds max_batch_size"})),
        )
            .into_response();
    }

    let mut accepted = 0u32;
    for result in body.results {
        let retry_count = state
            .queue
            .get(&result.key)
            .await
            .map_or(0, |e| e.retry_count + 1);
        let outcome = state
            .queue
            .record_result(
                &result.key,
                result.success,
                result.reason,
                backoff_secs(retry_count),
            )
            .await;
        if outcome.is_ok() {
            accepted += 1;
        } else {
            tracing::warn!(key = ?result.key, "queue fault recording result");
        }
    }

    Json(ResultsResponse { accepted }).into_response()
}
