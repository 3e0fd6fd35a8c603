use anyhow::{Context, Result};
use clap::{Arg, Command};
use std::time::Duration;

pub const ARG_CACHE_URL: &str = "cache-url";
pub const ARG_CACHE_TIMEOUT_MS: &str = "cache-timeout-ms";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CACHE_URL)
                .long(ARG_CACHE_URL)
                .help("Shared cache URL: redis://, rediss:// or memory://")
                .env("AUTHGATE_CACHE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CACHE_TIMEOUT_MS)
                .long(ARG_CACHE_TIMEOUT_MS)
                .help("Upper bound in milliseconds on every cache call")
                .env("AUTHGATE_CACHE_TIMEOUT_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if the cache URL is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_CACHE_URL)
            .cloned()
            .context("missing required argument: --cache-url")?;
        let timeout_ms = matches
            .get_one::<u64>(ARG_CACHE_TIMEOUT_MS)
            .copied()
            .unwrap_or(500);

        Ok(Self {
            url,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}
