//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::{
    actions::{Action, server::Args},
    commands::{self, auth, cache},
    globals::GlobalArgs,
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let cache_opts = cache::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        cache_timeout: cache_opts.timeout,
        auth_config: auth_opts.auth_config(),
        globals: GlobalArgs::new(dsn, cache_opts.url, auth_opts.jwt_secret),
    }))
}
