//! Bearer-token authentication, resolved to a caller id.
//!
//! Every daemon request carries `Authorization: Bearer <key>`; the server
//! never stores raw keys, only `sha256:<hex>` hashes in config (spec §4.6).
//! Unlike a plain allow/deny gate, this middleware publishes the resolved
//! [`CallerId`] as a request extension, since every authed route needs to
//! know which caller is asking.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::state::AppState;

/// The caller id resolved from a validated bearer token, injected into the
/// request's extensions for handlers to pull out via `Extension<CallerId>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerId(pub String);

/// Axum middleware: hash the bearer token and match it against any
/// configured caller's `api_key_hash`. On match, resolves the caller id and
/// lets the request through; otherwise returns 401.
///
/// # Error responses
///
/// - `401 Unauthorized` — header missing/malformed, or no caller matched.
pub async fn require_caller(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    let provided = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Missing or invalid Authorization header"})),
            )
                .into_response();
        }
    };

    let caller = state
        .config
        .modem_api
        .callers
        .iter()
        .find(|c| fidotest_common::verify_api_key(provided, &c.api_key_hash));

    match caller {
        Some(c) => {
            request
                .extensions_mut()
                .insert(CallerId(c.caller_id.clone()));
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid API key"})),
        )
            .into_response(),
    }
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    fidotest_common::constant_time_eq(expected, provided)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_exact_bytes() {
        assert!(constant_time_eq(b"sha256:abc", b"sha256:abc"));
        assert!(!constant_time_eq(b"sha256:abc", b"sha256:abd"));
        assert!(!constant_time_eq(b"sha256:abc", b"sha256:ab"));
    }
}
