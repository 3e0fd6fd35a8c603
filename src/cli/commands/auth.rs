use crate::auth::{
    AuthConfig,
    rate_limit::{LimiterClass, RateLimitPolicy},
};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_REMEMBER_TTL_SECONDS: &str = "remember-ttl-seconds";
pub const ARG_CAPTCHA_TTL_SECONDS: &str = "captcha-ttl-seconds";
pub const ARG_EXPOSE_CAPTCHA_CODE: &str = "expose-captcha-code";

/// `(class, flag prefix, env prefix, default limit, default window)`
const RATE_LIMIT_ARGS: [(LimiterClass, &str, &str, &str, &str); 4] = [
    (LimiterClass::Login, "login", "LOGIN", "5", "900"),
    (LimiterClass::Register, "register", "REGISTER", "3", "3600"),
    (LimiterClass::Captcha, "captcha", "CAPTCHA", "5", "300"),
    (LimiterClass::Api, "api", "API", "100", "60"),
];

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_rate_limit_args(command);
    with_captcha_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign tokens (at least 32 bytes)")
                .env("AUTHGATE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Token and session lifetime in seconds")
                .env("AUTHGATE_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_TTL_SECONDS)
                .long(ARG_REMEMBER_TTL_SECONDS)
                .help("Token and session lifetime in seconds when \"remember me\" is set")
                .env("AUTHGATE_REMEMBER_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    RATE_LIMIT_ARGS.iter().fold(
        command,
        |command, (_, flag, env, limit, window)| {
            command
                .arg(
                    Arg::new(format!("{flag}-rate-limit"))
                        .long(format!("{flag}-rate-limit"))
                        .help(format!("Requests allowed per window for {flag}"))
                        .env(format!("AUTHGATE_{env}_RATE_LIMIT"))
                        .default_value(*limit)
                        .value_parser(clap::value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new(format!("{flag}-rate-window-seconds"))
                        .long(format!("{flag}-rate-window-seconds"))
                        .help(format!("Window length in seconds for {flag}"))
                        .env(format!("AUTHGATE_{env}_RATE_WINDOW_SECONDS"))
                        .default_value(*window)
                        .value_parser(clap::value_parser!(u64).range(1..)),
                )
        },
    )
}

fn with_captcha_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CAPTCHA_TTL_SECONDS)
                .long(ARG_CAPTCHA_TTL_SECONDS)
                .help("One-time code lifetime in seconds")
                .env("AUTHGATE_CAPTCHA_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_EXPOSE_CAPTCHA_CODE)
                .long(ARG_EXPOSE_CAPTCHA_CODE)
                .help("Return generated codes in the response body (development only)")
                .env("AUTHGATE_EXPOSE_CAPTCHA_CODE")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub token_ttl_seconds: u64,
    pub remember_ttl_seconds: u64,
    pub captcha_ttl_seconds: u64,
    pub expose_captcha_code: bool,
    pub policies: Vec<RateLimitPolicy>,
}

impl Options {
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .map(|secret| SecretString::from(secret.as_str()))
            .context("missing required argument: --jwt-secret")?;

        let seconds = |name: &str, default: u64| {
            matches.get_one::<u64>(name).copied().unwrap_or(default)
        };

        let policies = RATE_LIMIT_ARGS
            .iter()
            .map(|(class, flag, _, _, _)| -> Result<RateLimitPolicy> {
                let limit = matches
                    .get_one::<u32>(&format!("{flag}-rate-limit"))
                    .copied()
                    .context(format!("missing --{flag}-rate-limit"))?;
                let window = matches
                    .get_one::<u64>(&format!("{flag}-rate-window-seconds"))
                    .copied()
                    .context(format!("missing --{flag}-rate-window-seconds"))?;
                Ok(RateLimitPolicy::new(
                    *class,
                    limit,
                    Duration::from_secs(window),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            jwt_secret,
            token_ttl_seconds: seconds(ARG_TOKEN_TTL_SECONDS, 604_800),
            remember_ttl_seconds: seconds(ARG_REMEMBER_TTL_SECONDS, 2_592_000),
            captcha_ttl_seconds: seconds(ARG_CAPTCHA_TTL_SECONDS, 300),
            expose_captcha_code: matches.get_flag(ARG_EXPOSE_CAPTCHA_CODE),
            policies,
        })
    }

    /// Fold the parsed flags into an [`AuthConfig`].
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        self.policies.iter().fold(
            AuthConfig::new()
                .with_token_ttl_seconds(self.token_ttl_seconds)
                .with_remember_ttl_seconds(self.remember_ttl_seconds)
                .with_captcha_ttl_seconds(self.captcha_ttl_seconds)
                .with_expose_captcha_code(self.expose_captcha_code),
            |config, policy| config.with_policy(*policy),
        )
    }
}
