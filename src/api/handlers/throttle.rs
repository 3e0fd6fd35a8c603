//! Rate-limit HTTP contract and the generic `/api` throttle.
//!
//! Throttled responses are 429 with `{error, message, resetTime}` and the
//! `Retry-After` and `X-RateLimit-*` headers. Admitted `/api` responses carry
//! the `X-RateLimit-*` headers of the generic policy too.

use super::extract_client_ip;
use crate::auth::{
    AuthState,
    rate_limit::{LimiterClass, RateLimitDecision},
};
use axum::{
    Json,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(ToSchema, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedBody {
    pub error: String,
    pub message: String,
    /// RFC 3339 instant at which the window closes.
    pub reset_time: String,
}

fn reset_time(reset_at_ms: i64) -> String {
    DateTime::from_timestamp_millis(reset_at_ms)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn insert_number(headers: &mut HeaderMap, name: HeaderName, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

/// Add `X-RateLimit-*`; the reset header is in epoch seconds.
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    insert_number(headers, X_RATELIMIT_LIMIT, decision.limit);
    insert_number(headers, X_RATELIMIT_REMAINING, decision.remaining);
    insert_number(
        headers,
        X_RATELIMIT_RESET,
        decision.reset_at_ms.saturating_add(999) / 1000,
    );
}

#[must_use]
pub fn rate_limited_response(decision: &RateLimitDecision, message: &str) -> Response {
    let body = RateLimitedBody {
        error: "Too many requests".to_string(),
        message: message.to_string(),
        reset_time: reset_time(decision.reset_at_ms),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    insert_rate_limit_headers(headers, decision);
    insert_number(
        headers,
        RETRY_AFTER,
        decision.retry_after_seconds(chrono::Utc::now().timestamp_millis()),
    );
    response
}

/// Generic per-client throttle for everything under `/api`.
pub async fn api_rate_limit(request: Request, next: Next) -> Response {
    let Some(state) = request.extensions().get::<Arc<AuthState>>().cloned() else {
        error!("auth state extension missing from router");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let client = extract_client_ip(request.headers());
    let decision = state
        .limiter()
        .check(state.config().policy(LimiterClass::Api), &client)
        .await;
    if !decision.allowed {
        return rate_limited_response(&decision, "Too many requests, please try again later");
    }

    let mut response = next.run(request).await;
    // A route-specific throttle already set its own headers.
    if !response.headers().contains_key(X_RATELIMIT_LIMIT) {
        insert_rate_limit_headers(response.headers_mut(), &decision);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied() -> RateLimitDecision {
        RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at_ms: chrono::Utc::now().timestamp_millis() + 90_000,
        }
    }

    #[test]
    fn reset_time_is_rfc3339() {
        assert_eq!(reset_time(1_700_000_000_000), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn throttled_response_carries_contract_headers() {
        let response = rate_limited_response(&denied(), "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        assert_eq!(
            headers.get(X_RATELIMIT_LIMIT).and_then(|v| v.to_str().ok()),
            Some("5")
        );
        assert_eq!(
            headers
                .get(X_RATELIMIT_REMAINING)
                .and_then(|v| v.to_str().ok()),
            Some("0")
        );
        assert!(headers.contains_key(X_RATELIMIT_RESET));

        let retry_after: u64 = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        assert!((89..=90).contains(&retry_after));
    }
}
