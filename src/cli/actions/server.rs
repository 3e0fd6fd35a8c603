use crate::{
    api,
    auth::{AuthConfig, AuthState, captcha::LogCodeDelivery, token::TokenService},
    cache,
    cli::{globals::GlobalArgs, telemetry},
    directory,
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub cache_timeout: Duration,
    pub auth_config: AuthConfig,
    pub globals: GlobalArgs,
}

/// Connect the cache and user directory, then serve until shutdown.
///
/// # Errors
/// Returns an error if the signing secret is too weak, the cache URL is
/// invalid, the user directory is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let tokens = TokenService::new(
        args.globals.jwt_secret.clone(),
        args.auth_config.token_ttl(),
        args.auth_config.remember_ttl(),
    )
    .context("Invalid --jwt-secret")?;

    let cache = cache::connect(args.globals.cache_url.expose_secret(), args.cache_timeout)
        .await
        .context("Failed to set up the cache")?;
    let directory = directory::connect(args.globals.dsn.expose_secret())
        .await
        .context("Failed to connect to the user directory")?;

    if args.auth_config.expose_captcha_code() {
        warn!("One-time codes are returned in responses; do not run like this in production");
    }

    let delivery = Arc::new(LogCodeDelivery::new(args.auth_config.expose_captcha_code()));
    let auth_state = Arc::new(AuthState::new(
        args.auth_config,
        cache,
        tokens,
        directory,
        delivery,
    ));

    info!(port = args.port, commit = crate::GIT_COMMIT_HASH, "starting authgate");
    let result = api::new(args.port, auth_state).await;

    telemetry::shutdown_tracer();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn args(jwt_secret: &str, cache_url: &str) -> Args {
        Args {
            port: 0,
            cache_timeout: Duration::from_millis(100),
            auth_config: AuthConfig::new(),
            globals: GlobalArgs::new(
                "memory://".to_string(),
                cache_url.to_string(),
                SecretString::from(jwt_secret),
            ),
        }
    }

    #[tokio::test]
    async fn weak_secret_is_fatal() {
        let result = execute(args("short", "memory://")).await;
        let message = result.err().map(|err| err.to_string());
        assert_eq!(message.as_deref(), Some("Invalid --jwt-secret"));
    }

    #[tokio::test]
    async fn unsupported_cache_scheme_is_fatal() {
        let result = execute(args("0123456789abcdef0123456789abcdef", "ftp://cache")).await;
        let message = result.err().map(|err| err.to_string());
        assert_eq!(message.as_deref(), Some("Failed to connect to the cache"));
    }
}
