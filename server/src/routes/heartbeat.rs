//! `POST /api/modem/heartbeat` — spec §6: upserts `caller_status` on every
//! call, creating the row on first contact.

use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use fidotest_common::dto::HeartbeatRequest;

use crate::auth::CallerId;
use crate::scheduler::SchedulerMsg;
use crate::state::AppState;

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Json(body): Json<HeartbeatRequest>,
) -> Json<Value> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = state
        .scheduler
        .send(SchedulerMsg::Heartbeat {
            caller_id: caller.0,
            modem_ready: body.modem_ready,
            completed_count: body.completed_count,
            failed_count: body.failed_count,
            last_test_time: body.last_test_time,
            reply: reply_tx,
        })
        .await;
    let _ = reply_rx.await;
    Json(json!({ "status": "ok" }))
}
