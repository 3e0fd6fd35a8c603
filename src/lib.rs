//! # Authgate
//!
//! `authgate` authenticates users and throttles abuse for a web API. All state
//! is kept in a shared cache so that any number of stateless instances agree on
//! it:
//!
//! - **Tokens:** HS256-signed credentials carrying the principal's id, display
//!   name and username, with a standard or "remember me" lifetime.
//! - **Sessions:** one live session per principal. A valid token without a live
//!   session is rejected, which makes logout an immediate revocation.
//! - **Rate limits:** fixed-window counters per client and purpose. When the
//!   cache is unreachable the limiter admits traffic.
//! - **One-time codes:** six-digit, single-use verification codes.
//! - **Request gate:** extracts the credential from `Authorization: Bearer` or
//!   the `token` cookie and admits the request only when both the token and its
//!   session check out. When the cache is unreachable the gate denies.

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod directory;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
