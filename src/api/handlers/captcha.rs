//! One-time code endpoints.
//!
//! A wrong or expired code is an expected user flow: 200 with
//! `success: false`. Only an unreachable cache is an HTTP error (503); a code
//! that cannot be confirmed is never treated as a match.

use super::{ApiError, extract_client_ip};
use crate::auth::{
    AuthState,
    captcha::{CodeInput, VerifyOutcome},
    rate_limit::LimiterClass,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct GenerateRequest {
    /// Owner of the code, such as an email address or phone number.
    key: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    /// Only present when the server runs with code exposure enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Seconds until the code expires.
    pub expires_in: u64,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyRequest {
    key: String,
    code: CodeInput,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
}

fn owner_key(key: &str) -> Result<&str, ApiError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("key is required".to_string()));
    }
    Ok(key)
}

#[utoipa::path(
    post,
    path = "/api/captcha/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Code generated and handed to delivery", body = GenerateResponse),
        (status = 400, description = "Missing key", body = super::ErrorBody),
        (status = 429, description = "Too many codes requested", body = super::throttle::RateLimitedBody),
        (status = 503, description = "Code store unavailable", body = super::ErrorBody)
    ),
    tag = "captcha"
)]
pub async fn generate(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let client = extract_client_ip(&headers);
    let decision = auth_state
        .limiter()
        .check(auth_state.config().policy(LimiterClass::Captcha), &client)
        .await;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            decision,
            message: "Too many verification codes requested, please try again later",
        });
    }

    let Json(request) = payload?;
    let key = owner_key(&request.key)?;
    let ttl = auth_state.config().captcha_ttl_seconds();

    let code = auth_state.codes().generate(key, ttl).await.map_err(|err| {
        error!("Failed to store one-time code: {err}");
        ApiError::Unavailable("Verification code store unavailable")
    })?;

    if let Err(err) = auth_state.delivery().deliver(key, &code) {
        warn!(owner_key = key, "Failed to deliver one-time code: {err}");
    }

    Ok(Json(GenerateResponse {
        success: true,
        code: auth_state.config().expose_captcha_code().then_some(code),
        expires_in: ttl,
    }))
}

#[utoipa::path(
    post,
    path = "/api/captcha/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verification result", body = VerifyResponse),
        (status = 400, description = "Invalid payload", body = super::ErrorBody),
        (status = 503, description = "Code store unavailable", body = super::ErrorBody)
    ),
    tag = "captcha"
)]
pub async fn verify(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = payload?;
    let key = owner_key(&request.key)?;

    let outcome = auth_state
        .codes()
        .verify(key, &request.code)
        .await
        .map_err(|err| {
            error!("Failed to verify one-time code: {err}");
            ApiError::Unavailable("Verification code store unavailable")
        })?;

    let (success, message) = match outcome {
        VerifyOutcome::Match => (true, "Verification successful"),
        VerifyOutcome::Mismatch => (false, "Invalid verification code"),
        VerifyOutcome::Expired => (false, "Verification code expired or not found"),
    };
    Ok(Json(VerifyResponse {
        success,
        message: message.to_string(),
    }))
}
