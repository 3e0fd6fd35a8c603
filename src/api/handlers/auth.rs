//! Login, registration, logout and session endpoints.
//!
//! Login and registration are throttled per client before any credential is
//! looked at. Every login attempt counts; a successful one clears the counter.

use super::{ApiError, extract_client_ip, normalize_email, valid_email};
use crate::{
    auth::{
        AuthState,
        cookies::{clear_token_cookie, token_cookie},
        gate::{ActivePrincipal, Principal},
        rate_limit::LimiterClass,
        session::SessionMetadata,
        token::{SubjectClaims, TokenLifetime},
    },
    directory::{DirectoryError, NewUser, UserRecord, password::verify_decoy},
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    /// Email, username or phone.
    identifier: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    name: Option<String>,
    phone: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl From<UserRecord> for UserView {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username,
            email: user.email,
            name: user.name,
            phone: user.phone,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
    pub user: UserView,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub user: UserView,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; token also set as cookie", body = LoginResponse),
        (status = 400, description = "Invalid payload", body = super::ErrorBody),
        (status = 401, description = "Invalid credentials", body = super::ErrorBody),
        (status = 429, description = "Too many attempts", body = super::throttle::RateLimitedBody),
        (status = 503, description = "Directory or session store unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let client = extract_client_ip(&headers);
    let decision = auth_state
        .limiter()
        .check(auth_state.config().policy(LimiterClass::Login), &client)
        .await;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            decision,
            message: "Too many login attempts, please try again later",
        });
    }

    let Json(request) = payload?;
    let identifier = request.identifier.trim();
    if identifier.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "identifier and password are required".to_string(),
        ));
    }

    let password = SecretString::from(request.password);
    let user = match auth_state.directory().find_by_login(identifier).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            verify_decoy(password).await;
            return Err(ApiError::InvalidCredentials);
        }
        Err(err) => {
            error!("Failed to look up user: {err}");
            return Err(ApiError::Unavailable("User directory unavailable"));
        }
    };

    match auth_state.directory().verify_password(&user, &password).await {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::InvalidCredentials),
        Err(err) => {
            error!("Failed to verify password: {err}");
            return Err(ApiError::Internal);
        }
    }

    let lifetime = TokenLifetime::from_remember(request.remember);
    let subject = SubjectClaims {
        principal_id: user.id.to_string(),
        display_name: user.display_name().to_string(),
        username: user.username.clone(),
    };
    let issued = auth_state.tokens().issue(&subject, lifetime).map_err(|err| {
        error!("Failed to issue token: {err}");
        ApiError::Internal
    })?;

    // Without a live session the token would be rejected by the gate anyway.
    if let Err(err) = auth_state
        .sessions()
        .create(
            &subject.principal_id,
            SessionMetadata {
                remember: request.remember,
            },
            issued.lifetime_seconds(),
        )
        .await
    {
        error!("Failed to create session: {err}");
        return Err(ApiError::Unavailable("Session store unavailable"));
    }

    auth_state.limiter().clear(LimiterClass::Login, &client).await;
    info!(principal_id = %subject.principal_id, remember = request.remember, "login succeeded");

    let cookie = token_cookie(&issued.token, issued.lifetime_seconds()).map_err(|err| {
        error!("Failed to build token cookie: {err}");
        ApiError::Internal
    })?;
    let body = LoginResponse {
        expires_in: issued.lifetime_seconds(),
        token: issued.token,
        user: UserView::from(user),
    };
    Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid payload", body = super::ErrorBody),
        (status = 409, description = "Username, email or phone already registered", body = super::ErrorBody),
        (status = 429, description = "Too many registrations", body = super::throttle::RateLimitedBody),
        (status = 503, description = "Directory unavailable", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let client = extract_client_ip(&headers);
    let decision = auth_state
        .limiter()
        .check(auth_state.config().policy(LimiterClass::Register), &client)
        .await;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            decision,
            message: "Too many registration attempts, please try again later",
        });
    }

    let Json(request) = payload?;
    let username = request.username.trim().to_string();
    let email = normalize_email(&request.email);
    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username, email and password are required".to_string(),
        ));
    }
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("invalid email".to_string()));
    }

    let new_user = NewUser {
        username,
        email,
        password: SecretString::from(request.password),
        name: non_empty(request.name),
        phone: non_empty(request.phone),
    };
    match auth_state.directory().create(new_user).await {
        Ok(user) => {
            info!(principal_id = %user.id, "user registered");
            let body = UserResponse {
                user: UserView::from(user),
            };
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        Err(DirectoryError::Conflict) => Err(ApiError::Conflict(
            "username, email or phone already registered".to_string(),
        )),
        Err(err) => {
            error!("Failed to create user: {err}");
            Err(ApiError::Unavailable("User directory unavailable"))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session destroyed and cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    principal: Option<Principal>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(principal) = principal {
        match auth_state.sessions().destroy(&principal.id).await {
            Ok(()) => info!(principal_id = %principal.id, "logged out"),
            Err(err) => warn!(principal_id = %principal.id, "Failed to destroy session: {err}"),
        }
    }

    // Always clear the cookie, even if there was no session.
    (StatusCode::NO_CONTENT, [(SET_COOKIE, clear_token_cookie())])
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is live", body = UserResponse),
        (status = 401, description = "No live session", body = super::ErrorBody)
    ),
    tag = "auth"
)]
pub async fn session(
    ActivePrincipal(principal): ActivePrincipal,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = Uuid::parse_str(&principal.id).map_err(|_| ApiError::Unauthorized)?;
    match auth_state.directory().find_by_id(id).await {
        Ok(Some(user)) => Ok(Json(UserResponse {
            user: UserView::from(user),
        })),
        Ok(None) => Err(ApiError::Unauthorized),
        Err(err) => {
            error!("Failed to load user: {err}");
            Err(ApiError::Unavailable("User directory unavailable"))
        }
    }
}
