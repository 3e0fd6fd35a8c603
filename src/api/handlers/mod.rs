pub mod auth;
pub mod captcha;
pub mod health;
pub mod throttle;

pub use self::health::health;

use crate::auth::{gate::unauthenticated_response, rate_limit::RateLimitDecision};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

/// Identifier used when no proxy header names the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Error body shared by every non-2xx JSON response.
#[derive(ToSchema, Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Every way a handler can fail, mapped to HTTP in one place.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Generic 401; never says which check failed.
    Unauthorized,
    InvalidCredentials,
    Conflict(String),
    RateLimited {
        decision: RateLimitDecision,
        message: &'static str,
    },
    /// A dependency is down and no fail-open/closed policy applies.
    Unavailable(&'static str),
    Internal,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("rejected request body: {rejection}");
        Self::BadRequest(rejection.body_text())
    }
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            Self::Unauthorized => unauthenticated_response(),
            Self::InvalidCredentials => error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Invalid credentials".to_string(),
            ),
            Self::Conflict(message) => error_response(StatusCode::CONFLICT, "conflict", message),
            Self::RateLimited { decision, message } => {
                throttle::rate_limited_response(&decision, message)
            }
            Self::Unavailable(message) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                message.to_string(),
            ),
            Self::Internal => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            ),
        }
    }
}

/// Normalize an email for lookup and uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Client identifier for rate limiting, from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), str::to_string)
}
