//! `GET /api/modem/nodes` — spec §6: return up to N pending rows assigned
//! to the requesting caller.

use axum::{
    extract::{Query, State},
    Extension, Json,
};

use fidotest_common::dto::{NodeAssignment, NodesQuery, NodesResponse};

use crate::auth::CallerId;
use crate::state::AppState;

pub async fn get_nodes(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    Query(query): Query<NodesQuery>,
) -> Json<NodesResponse> {
    let limit = query.limit.min(state.config.modem_api.max_batch_size as u32) as usize;
    let (rows, remaining) = state.queue.pending_for_caller(&caller.0, limit).await;

    let nodes = rows
        .into_iter()
        .map(|e| NodeAssignment {
            zone: e.zone,
            net: e.net,
            node: e.node,
            conflict_sequence: e.conflict_sequence,
            phone: e.phone,
            phone_normalized: e.phone_normalized,
            modem_flags: e.modem_flags,
            priority: e.priority,
            retry_count: e.retry_count,
        })
        .collect();

    Json(NodesResponse { nodes, remaining })
}
