//! Request-rate limiting for the session endpoints.
//!
//! Keyed per-IP GCRA limiters that answer 429 before any credential work is
//! done. Independent of the attempt limiter, which only counts failures.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use serde_json::json;
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::auth::{AuthError, AuthErrorKind, extract_client_ip};
use crate::cli::IpExtractor;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const REFRESH_PER_SEC: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Quotas for the rate-limited endpoints.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    /// Login: 5 requests burst, refilled at 1 per second
    pub login: Quota,
    /// Refresh: 10 requests per second
    pub refresh: Quota,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            refresh: Quota::per_second(REFRESH_PER_SEC),
        }
    }
}

/// One endpoint's limiter together with the client IP strategy.
#[derive(Clone)]
pub struct EndpointLimiter {
    limiter: Arc<IpLimiter>,
    ip_extractor: Option<IpExtractor>,
}

impl EndpointLimiter {
    pub fn new(quota: Quota, ip_extractor: Option<IpExtractor>) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            ip_extractor,
        }
    }

    /// Returns false when `client` has exhausted its quota.
    pub fn check(&self, client: &str) -> bool {
        self.limiter.check_key(&client.to_string()).is_ok()
    }
}

/// Middleware enforcing an [`EndpointLimiter`].
pub async fn rate_limit(
    State(limiter): State<EndpointLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, limiter.ip_extractor.as_ref()) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Rate-limited endpoint called without client IP");
            return AuthError::new(AuthErrorKind::ClientUnknown).into_response();
        }
    };

    if limiter.check(&ip) {
        next.run(request).await
    } else {
        warn!(client = %ip, path = %request.uri().path(), "Request rate exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": "Too many requests, please try again later",
            })),
        )
            .into_response()
    }
}
