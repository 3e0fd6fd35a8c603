//! Credential extraction and the request gate.
//!
//! Flow Overview, per request:
//! 1) Locate a credential: `Authorization: Bearer <token>` first, then the
//!    `token` cookie. Neither present means `NoCredential`.
//! 2) Verify signature and expiry; any token failure is `InvalidToken`.
//! 3) Confirm the session key still exists; a valid token without a session
//!    is `SessionExpired` (logged out or revoked).
//!
//! Clients only ever see a generic 401. The precise reason is logged at
//! `debug`, and cache failures fail closed and are logged at `error`.
//!
//! Handlers authenticate by taking [`Principal`] (or [`ActivePrincipal`] to
//! also slide the session TTL) as an extractor; none parse credentials.

use super::{
    AuthState,
    cookies::{TOKEN_COOKIE_NAME, cookie_value},
    session::{SessionError, SessionStore},
    token::{TokenLifetime, TokenService},
};
use axum::{
    Json, async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    Header,
    Cookie,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub source: CredentialSource,
}

/// Why a request was not authenticated. Never sent to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    NoCredential,
    InvalidToken,
    SessionExpired,
    /// The session store could not be consulted.
    Unavailable,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoCredential => "no_credential",
            Self::InvalidToken => "invalid_token",
            Self::SessionExpired => "session_expired",
            Self::Unavailable => "session_store_unavailable",
        }
    }
}

/// Identity of an authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
    pub username: String,
    pub source: CredentialSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Authenticated(Principal),
    Unauthenticated(DenyReason),
}

impl AuthDecision {
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated(principal) => Some(&principal.id),
            Self::Unauthenticated(_) => None,
        }
    }
}

/// Find the credential in `headers`, bearer header taking precedence.
#[must_use]
pub fn locate_credential(headers: &HeaderMap) -> Option<Credential> {
    if let Some(token) = bearer_token(headers) {
        return Some(Credential {
            token,
            source: CredentialSource::Header,
        });
    }
    cookie_value(headers, TOKEN_COOKIE_NAME).map(|token| Credential {
        token,
        source: CredentialSource::Cookie,
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[derive(Clone)]
pub struct RequestGate {
    tokens: Arc<TokenService>,
    sessions: SessionStore,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate").finish_non_exhaustive()
    }
}

impl RequestGate {
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, sessions: SessionStore) -> Self {
        Self { tokens, sessions }
    }

    /// Run the credential state machine over `headers`.
    pub async fn authorize(&self, headers: &HeaderMap) -> AuthDecision {
        let Some(credential) = locate_credential(headers) else {
            return deny(DenyReason::NoCredential);
        };

        let claims = match self.tokens.verify(&credential.token) {
            Ok(claims) => claims,
            Err(err) => {
                debug!(source = ?credential.source, error = %err, "token rejected");
                return deny(DenyReason::InvalidToken);
            }
        };

        match self.sessions.exists(&claims.sub).await {
            Ok(true) => AuthDecision::Authenticated(Principal {
                id: claims.sub,
                display_name: claims.name,
                username: claims.username,
                source: credential.source,
            }),
            Ok(false) => {
                debug!(principal_id = %claims.sub, "no live session for token");
                deny(DenyReason::SessionExpired)
            }
            Err(err) => {
                error!(principal_id = %claims.sub, error = %err, "session check failed, denying");
                deny(DenyReason::Unavailable)
            }
        }
    }

    /// [`RequestGate::authorize`], then restart the session TTL on success.
    ///
    /// Failing to extend the session does not revoke this request's access.
    pub async fn authorize_and_touch(&self, headers: &HeaderMap) -> AuthDecision {
        let decision = self.authorize(headers).await;
        if let AuthDecision::Authenticated(principal) = &decision {
            self.touch(&principal.id).await;
        }
        decision
    }

    async fn touch(&self, principal_id: &str) {
        let record = match self.sessions.get(principal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(principal_id, error = %err, "failed to load session for touch");
                return;
            }
        };
        let ttl = self
            .tokens
            .lifetime(TokenLifetime::from_remember(record.remember))
            .as_secs();
        match self.sessions.renew(record, ttl).await {
            Ok(_) => {}
            Err(SessionError::NotFound) => debug!(principal_id, "session ended during touch"),
            Err(err) => warn!(principal_id, error = %err, "failed to extend session"),
        }
    }
}

fn deny(reason: DenyReason) -> AuthDecision {
    debug!(reason = reason.as_str(), "request unauthenticated");
    AuthDecision::Unauthenticated(reason)
}

/// Rejection for the auth extractors.
#[derive(Debug)]
pub enum AuthRejection {
    Unauthenticated,
    /// The router was built without an `AuthState` extension.
    MissingState,
}

/// The one 401 every authenticated route answers with.
#[must_use]
pub fn unauthenticated_response() -> Response {
    let body = Json(json!({
        "error": "unauthorized",
        "message": "Authentication required",
    }));
    let mut response = (StatusCode::UNAUTHORIZED, body).into_response();
    response.headers_mut().insert(
        axum::http::header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Bearer"),
    );
    response
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => unauthenticated_response(),
            Self::MissingState => {
                error!("auth state extension missing from router");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn auth_state(parts: &Parts) -> Result<Arc<AuthState>, AuthRejection> {
    parts
        .extensions
        .get::<Arc<AuthState>>()
        .cloned()
        .ok_or(AuthRejection::MissingState)
}

fn into_principal(decision: AuthDecision) -> Result<Principal, AuthRejection> {
    match decision {
        AuthDecision::Authenticated(principal) => Ok(principal),
        AuthDecision::Unauthenticated(_) => Err(AuthRejection::Unauthenticated),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = auth_state(parts)?;
        into_principal(state.gate().authorize(&parts.headers).await)
    }
}

/// Authenticated caller whose session TTL was restarted by this request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivePrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for ActivePrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let state = auth_state(parts)?;
        into_principal(state.gate().authorize_and_touch(&parts.headers).await).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{session::SessionMetadata, token::SubjectClaims};
    use crate::cache::{
        Cache, MemoryCache,
        testing::{DeleteAfterGet, FailingCache},
    };
    use axum::http::header::COOKIE;
    use secrecy::SecretString;
    use std::time::Duration;

    const SECRET: &str = "test-signing-secret-0123456789abcdef";

    fn tokens() -> Arc<TokenService> {
        let service = TokenService::new(
            SecretString::from(SECRET),
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        );
        match service {
            Ok(service) => Arc::new(service),
            Err(err) => panic!("token service: {err}"),
        }
    }

    fn subject(id: &str) -> SubjectClaims {
        SubjectClaims {
            principal_id: id.to_string(),
            display_name: "Ada Lovelace".to_string(),
            username: "ada".to_string(),
        }
    }

    fn mint(tokens: &TokenService, id: &str) -> String {
        match tokens.issue(&subject(id), TokenLifetime::Standard) {
            Ok(issued) => issued.token,
            Err(err) => panic!("issue: {err}"),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn cookie(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("lang=en; token={token}")) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    struct Fixture {
        gate: RequestGate,
        tokens: Arc<TokenService>,
        sessions: SessionStore,
        cache: MemoryCache,
    }

    fn fixture() -> Fixture {
        let cache = MemoryCache::new();
        let sessions = SessionStore::new(Arc::new(cache.clone()));
        let tokens = tokens();
        Fixture {
            gate: RequestGate::new(tokens.clone(), sessions.clone()),
            tokens,
            sessions,
            cache,
        }
    }

    #[test]
    fn header_takes_precedence_over_cookie() {
        let mut headers = cookie("from-cookie");
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        assert_eq!(
            locate_credential(&headers),
            Some(Credential {
                token: "from-header".to_string(),
                source: CredentialSource::Header,
            })
        );
    }

    #[test]
    fn non_bearer_header_falls_back_to_cookie() {
        let mut headers = cookie("from-cookie");
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(
            locate_credential(&headers).map(|c| c.source),
            Some(CredentialSource::Cookie)
        );
    }

    #[test]
    fn empty_bearer_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(locate_credential(&headers), None);
    }

    #[tokio::test]
    async fn no_credential() {
        let f = fixture();
        assert_eq!(
            f.gate.authorize(&HeaderMap::new()).await,
            AuthDecision::Unauthenticated(DenyReason::NoCredential)
        );
    }

    #[tokio::test]
    async fn invalid_token() {
        let f = fixture();
        assert_eq!(
            f.gate.authorize(&bearer("not.a.jwt")).await,
            AuthDecision::Unauthenticated(DenyReason::InvalidToken)
        );
    }

    #[tokio::test]
    async fn valid_token_without_session_is_rejected() {
        let f = fixture();
        let token = mint(&f.tokens, "42");
        assert_eq!(
            f.gate.authorize(&bearer(&token)).await,
            AuthDecision::Unauthenticated(DenyReason::SessionExpired)
        );
    }

    #[tokio::test]
    async fn live_session_authenticates_via_header_and_cookie() -> Result<(), SessionError> {
        let f = fixture();
        let token = mint(&f.tokens, "42");
        f.sessions.create("42", SessionMetadata::default(), 3600).await?;

        let decision = f.gate.authorize(&bearer(&token)).await;
        assert_eq!(decision.principal_id(), Some("42"));

        match f.gate.authorize(&cookie(&token)).await {
            AuthDecision::Authenticated(principal) => {
                assert_eq!(principal.source, CredentialSource::Cookie);
                assert_eq!(principal.username, "ada");
            }
            AuthDecision::Unauthenticated(reason) => panic!("denied: {reason:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn destroyed_session_revokes_token() -> Result<(), SessionError> {
        let f = fixture();
        let token = mint(&f.tokens, "42");
        f.sessions.create("42", SessionMetadata::default(), 3600).await?;
        f.sessions.destroy("42").await?;

        assert_eq!(
            f.gate.authorize(&bearer(&token)).await,
            AuthDecision::Unauthenticated(DenyReason::SessionExpired)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn touch_restarts_ttl_from_remember_flag() -> Result<(), SessionError> {
        let f = fixture();
        let token = mint(&f.tokens, "42");
        f.sessions
            .create("42", SessionMetadata { remember: true }, 7200)
            .await?;
        tokio::time::advance(Duration::from_secs(1000)).await;

        let decision = f.gate.authorize_and_touch(&bearer(&token)).await;
        assert!(decision.principal_id().is_some());
        assert_eq!(f.cache.ttl("session:42").await?, Some(7200));

        let plain = f.gate.authorize(&bearer(&token)).await;
        assert!(plain.principal_id().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn touch_racing_logout_keeps_session_revoked() -> Result<(), SessionError> {
        let f = fixture();
        let token = mint(&f.tokens, "42");
        f.sessions.create("42", SessionMetadata::default(), 3600).await?;

        // Logout lands between the touch's read and its write.
        let racing = RequestGate::new(
            f.tokens.clone(),
            SessionStore::new(Arc::new(DeleteAfterGet::new(f.cache.clone(), "session:42"))),
        );
        let decision = racing.authorize_and_touch(&bearer(&token)).await;
        assert_eq!(decision.principal_id(), Some("42"));

        assert!(!f.sessions.exists("42").await?);
        assert_eq!(
            f.gate.authorize(&bearer(&token)).await,
            AuthDecision::Unauthenticated(DenyReason::SessionExpired)
        );
        Ok(())
    }

    #[test]
    fn rejection_carries_bearer_challenge() {
        let response = AuthRejection::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok()),
            Some("Bearer")
        );
    }

    #[tokio::test]
    async fn cache_outage_fails_closed() {
        let tokens = tokens();
        let token = mint(&tokens, "42");
        let gate = RequestGate::new(tokens, SessionStore::new(Arc::new(FailingCache)));

        assert_eq!(
            gate.authorize(&bearer(&token)).await,
            AuthDecision::Unauthenticated(DenyReason::Unavailable)
        );
        assert_eq!(
            gate.authorize_and_touch(&bearer(&token)).await,
            AuthDecision::Unauthenticated(DenyReason::Unavailable)
        );
    }
}
