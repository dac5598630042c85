//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to an [`Action`], here always starting the
//! login API server with its backend and flow configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{backend, login};
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or URLs are invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let backend_opts = backend::Options::parse(matches)?;
    let login_opts = login::Options::parse(matches)?;

    let backend_url = Url::parse(&backend_opts.url)
        .with_context(|| format!("invalid --{}: {}", backend::ARG_BACKEND_URL, backend_opts.url))?;
    let public_url = Url::parse(&login_opts.public_url).with_context(|| {
        format!(
            "invalid --{}: {}",
            login::ARG_PUBLIC_URL,
            login_opts.public_url
        )
    })?;

    Ok(Action::Server(Args {
        port,
        backend_url,
        backend_token: backend_opts.token,
        backend_timeout_seconds: backend_opts.timeout_seconds,
        public_url,
        iframe: login_opts.iframe,
        session_lifetime_seconds: login_opts.session_lifetime_seconds,
        registration_idle_seconds: login_opts.registration_idle_seconds,
        otp_cooldown_seconds: login_opts.otp_cooldown_seconds,
        otp_initial_bypass: login_opts.otp_initial_bypass,
    }))
}
