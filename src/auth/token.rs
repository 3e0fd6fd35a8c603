//! Signed, time-bounded credentials (compact JWS, HS256).
//!
//! Tokens are stateless: a valid signature and a future `exp` only prove the
//! token was minted here. Whether the session behind it is still live is a
//! separate question answered by the session store.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("signing secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,
    #[error("failed to encode token")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Identity embedded in a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectClaims {
    pub principal_id: String,
    pub display_name: String,
    pub username: String,
}

/// Wire payload of a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub name: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    #[must_use]
    pub fn subject(&self) -> SubjectClaims {
        SubjectClaims {
            principal_id: self.sub.clone(),
            display_name: self.name.clone(),
            username: self.username.clone(),
        }
    }
}

/// Which of the two fixed lifetimes a token gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenLifetime {
    Standard,
    /// "Remember me" logins.
    Extended,
}

impl TokenLifetime {
    #[must_use]
    pub fn from_remember(remember: bool) -> Self {
        if remember {
            Self::Extended
        } else {
            Self::Standard
        }
    }
}

/// An issued token together with its validity window.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl IssuedToken {
    #[must_use]
    pub fn lifetime_seconds(&self) -> u64 {
        u64::try_from(self.expires_at - self.issued_at).unwrap_or(0)
    }
}

pub struct TokenService {
    key: HmacSha256,
    standard: Duration,
    extended: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &"***")
            .field("standard", &self.standard)
            .field("extended", &self.extended)
            .finish()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

impl TokenService {
    /// # Errors
    /// Returns [`TokenError::WeakSecret`] when the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(
        secret: SecretString,
        standard: Duration,
        extended: Duration,
    ) -> Result<Self, TokenError> {
        let secret = secret.expose_secret().as_bytes();
        if secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }
        let key = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::WeakSecret)?;
        Ok(Self {
            key,
            standard,
            extended,
        })
    }

    #[must_use]
    pub fn lifetime(&self, lifetime: TokenLifetime) -> Duration {
        match lifetime {
            TokenLifetime::Standard => self.standard,
            TokenLifetime::Extended => self.extended,
        }
    }

    /// Mint a token for `subject` valid for the selected lifetime.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be encoded.
    pub fn issue(
        &self,
        subject: &SubjectClaims,
        lifetime: TokenLifetime,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, lifetime, chrono::Utc::now().timestamp())
    }

    /// Same as [`TokenService::issue`] with an explicit clock.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be encoded.
    pub fn issue_at(
        &self,
        subject: &SubjectClaims,
        lifetime: TokenLifetime,
        now_unix_seconds: i64,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now_unix_seconds.saturating_add(seconds(self.lifetime(lifetime)));
        let claims = TokenClaims {
            sub: subject.principal_id.clone(),
            name: subject.display_name.clone(),
            username: subject.username.clone(),
            iat: now_unix_seconds,
            exp: expires_at,
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.key.clone();
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature_b64}"),
            issued_at: now_unix_seconds,
            expires_at,
        })
    }

    /// Check signature and expiry against the current time.
    ///
    /// # Errors
    /// Returns the precise [`TokenError`] kind; callers collapse all of them
    /// into "unauthenticated".
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Same as [`TokenService::verify`] with an explicit clock.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] for anything that is not a three-part HS256 token
    /// - [`TokenError::InvalidSignature`] when the MAC does not match
    /// - [`TokenError::Expired`] when `exp` is not in the future
    pub fn verify_at(&self, token: &str, now_unix_seconds: i64) -> Result<TokenClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.key.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
