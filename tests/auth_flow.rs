//! End-to-end flows through the public API.
//!
//! Every test runs against the in-process cache. Set `AUTHGATE_TEST_REDIS_URL`
//! to also run the shared-state checks against a live Redis.

use anyhow::Result;
use authgate::{
    auth::{
        captcha::{CodeInput, OneTimeCodeStore, VerifyOutcome},
        gate::{AuthDecision, CredentialSource, DenyReason, RequestGate},
        rate_limit::{LimiterClass, RateLimitPolicy, RateLimiter},
        session::{SessionMetadata, SessionStore},
        token::{SubjectClaims, TokenLifetime, TokenService},
    },
    cache::{self, Cache, MemoryCache},
};
use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION, header::COOKIE};
use secrecy::SecretString;
use std::{env, sync::Arc, time::Duration};

const SECRET: &str = "integration-signing-secret-0123456789";

struct Components {
    tokens: Arc<TokenService>,
    sessions: SessionStore,
    gate: RequestGate,
    limiter: RateLimiter,
    codes: OneTimeCodeStore,
}

fn components(cache: Arc<dyn Cache>) -> Result<Components> {
    let tokens = Arc::new(TokenService::new(
        SecretString::from(SECRET),
        Duration::from_secs(3600),
        Duration::from_secs(7200),
    )?);
    let sessions = SessionStore::new(cache.clone());
    Ok(Components {
        gate: RequestGate::new(tokens.clone(), sessions.clone()),
        tokens,
        sessions,
        limiter: RateLimiter::new(cache.clone()),
        codes: OneTimeCodeStore::new(cache),
    })
}

fn subject(id: &str) -> SubjectClaims {
    SubjectClaims {
        principal_id: id.to_string(),
        display_name: "Grace Hopper".to_string(),
        username: "grace".to_string(),
    }
}

fn bearer(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    Ok(headers)
}

async fn redis_cache() -> Result<Option<Arc<dyn Cache>>> {
    let Ok(url) = env::var("AUTHGATE_TEST_REDIS_URL") else {
        return Ok(None);
    };
    Ok(Some(cache::connect(&url, Duration::from_secs(2)).await?))
}

async fn login_logout_revokes(cache: Arc<dyn Cache>, principal_id: &str) -> Result<()> {
    let c = components(cache)?;

    let issued = c.tokens.issue(&subject(principal_id), TokenLifetime::Standard)?;
    c.sessions
        .create(
            principal_id,
            SessionMetadata { remember: false },
            issued.lifetime_seconds(),
        )
        .await?;

    let headers = bearer(&issued.token)?;
    match c.gate.authorize(&headers).await {
        AuthDecision::Authenticated(principal) => {
            assert_eq!(principal.id, principal_id);
            assert_eq!(principal.username, "grace");
            assert_eq!(principal.source, CredentialSource::Header);
        }
        AuthDecision::Unauthenticated(reason) => panic!("denied: {reason:?}"),
    }

    c.sessions.destroy(principal_id).await?;
    assert_eq!(
        c.gate.authorize(&headers).await,
        AuthDecision::Unauthenticated(DenyReason::SessionExpired)
    );
    Ok(())
}

async fn concurrent_limit_is_exact(cache: Arc<dyn Cache>, identifier: &str) -> Result<()> {
    let limiter = RateLimiter::new(cache);
    limiter.clear(LimiterClass::Register, identifier).await;
    let policy = RateLimitPolicy::new(LimiterClass::Register, 3, Duration::from_secs(60));

    let attempts = (0..12).map(|_| {
        let limiter = limiter.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move { limiter.check(&policy, &identifier).await })
    });

    let mut allowed = 0;
    for attempt in attempts.collect::<Vec<_>>() {
        if attempt.await?.allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 3);

    limiter.clear(LimiterClass::Register, identifier).await;
    Ok(())
}

#[tokio::test]
async fn login_then_logout_revokes_token() -> Result<()> {
    login_logout_revokes(Arc::new(MemoryCache::new()), "principal-1").await
}

#[tokio::test]
async fn concurrent_attempts_admit_exactly_the_limit() -> Result<()> {
    concurrent_limit_is_exact(Arc::new(MemoryCache::new()), "198.51.100.7").await
}

#[tokio::test]
async fn cookie_credential_reaches_the_same_session() -> Result<()> {
    let c = components(Arc::new(MemoryCache::new()))?;
    let issued = c.tokens.issue(&subject("principal-2"), TokenLifetime::Extended)?;
    c.sessions
        .create(
            "principal-2",
            SessionMetadata { remember: true },
            issued.lifetime_seconds(),
        )
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&format!("theme=dark; token={}", issued.token))?);

    let decision = c.gate.authorize_and_touch(&headers).await;
    assert_eq!(decision.principal_id(), Some("principal-2"));
    assert!(c.sessions.get("principal-2").await?.is_some_and(|s| s.remember));
    Ok(())
}

#[tokio::test]
async fn token_from_another_secret_is_rejected() -> Result<()> {
    let c = components(Arc::new(MemoryCache::new()))?;
    let other = TokenService::new(
        SecretString::from("a-completely-different-secret-9876543210"),
        Duration::from_secs(3600),
        Duration::from_secs(7200),
    )?;
    let forged = other.issue(&subject("principal-3"), TokenLifetime::Standard)?;
    c.sessions
        .create("principal-3", SessionMetadata::default(), 3600)
        .await?;

    assert_eq!(
        c.gate.authorize(&bearer(&forged.token)?).await,
        AuthDecision::Unauthenticated(DenyReason::InvalidToken)
    );
    Ok(())
}

#[tokio::test]
async fn one_time_code_is_single_use() -> Result<()> {
    let c = components(Arc::new(MemoryCache::new()))?;
    let code = c.codes.generate("grace@example.com", 60).await?;

    assert_eq!(
        c.codes
            .verify("grace@example.com", &CodeInput::from("000000x"))
            .await?,
        VerifyOutcome::Mismatch
    );
    assert_eq!(
        c.codes
            .verify("grace@example.com", &CodeInput::from(code.as_str()))
            .await?,
        VerifyOutcome::Match
    );
    assert_eq!(
        c.codes
            .verify("grace@example.com", &CodeInput::from(code.as_str()))
            .await?,
        VerifyOutcome::Expired
    );
    Ok(())
}

#[tokio::test]
async fn limiter_counts_survive_separate_instances() -> Result<()> {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let c = components(cache.clone())?;
    let policy = RateLimitPolicy::new(LimiterClass::Login, 2, Duration::from_secs(60));

    assert!(c.limiter.check(&policy, "client").await.allowed);
    // A second instance over the same cache shares the counter.
    let other = RateLimiter::new(cache);
    assert!(other.check(&policy, "client").await.allowed);
    assert!(!c.limiter.check(&policy, "client").await.allowed);
    Ok(())
}

#[tokio::test]
async fn redis_login_then_logout_revokes_token() -> Result<()> {
    let Some(cache) = redis_cache().await? else {
        return Ok(());
    };
    login_logout_revokes(cache, &format!("it-{}", uuid::Uuid::new_v4())).await
}

#[tokio::test]
async fn redis_concurrent_attempts_admit_exactly_the_limit() -> Result<()> {
    let Some(cache) = redis_cache().await? else {
        return Ok(());
    };
    concurrent_limit_is_exact(cache, &format!("it-{}", uuid::Uuid::new_v4())).await
}
