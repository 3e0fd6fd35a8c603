//! The `token` cookie carrying the credential for browser clients.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};

pub const TOKEN_COOKIE_NAME: &str = "token";

/// Build the `Set-Cookie` value for a freshly minted token.
///
/// # Errors
/// Returns an error if `token` contains bytes not allowed in a header.
pub fn token_cookie(token: &str, max_age_seconds: u64) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{TOKEN_COOKIE_NAME}={token}; HttpOnly; Secure; SameSite=Strict; Max-Age={max_age_seconds}; Path=/"
    ))
}

/// `Set-Cookie` value that makes the client drop the token cookie.
#[must_use]
pub fn clear_token_cookie() -> HeaderValue {
    HeaderValue::from_static("token=; HttpOnly; Secure; SameSite=Strict; Max-Age=0; Path=/")
}

/// First non-empty value of cookie `name` across all `Cookie` headers.
#[must_use]
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| key.trim() == name && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cookie_carries_all_attributes() {
        let cookie = token_cookie("abc.def.ghi", 604_800).map(|value| value.to_str().map(String::from));
        assert_eq!(
            cookie.ok().and_then(Result::ok).as_deref(),
            Some("token=abc.def.ghi; HttpOnly; Secure; SameSite=Strict; Max-Age=604800; Path=/")
        );
    }

    #[test]
    fn token_cookie_rejects_header_breaking_values() {
        assert!(token_cookie("bad\nvalue", 60).is_err());
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_token_cookie();
        let value = cookie.to_str().unwrap_or_default();
        assert!(value.starts_with("token=;"));
        assert!(value.contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; token=abc; lang=en"));
        assert_eq!(cookie_value(&headers, "token").as_deref(), Some("abc"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn cookie_value_scans_multiple_headers_and_skips_empty() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("token="));
        headers.append(COOKIE, HeaderValue::from_static("other=1; token=xyz"));
        assert_eq!(cookie_value(&headers, "token").as_deref(), Some("xyz"));
    }

    #[test]
    fn cookie_value_does_not_match_prefixes() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("mytoken=abc"));
        assert_eq!(cookie_value(&headers, "token"), None);
    }
}
