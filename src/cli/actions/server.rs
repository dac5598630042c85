use crate::{
    api::{self, LoginState},
    cli::telemetry,
    login::{
        http_backend::HttpBackendConfig, CookieOptions, HttpIdentityBackend, LoginConfig,
        LoginFlow, OtpResendPolicy,
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub backend_url: Url,
    pub backend_token: SecretString,
    pub backend_timeout_seconds: u64,
    pub public_url: Url,
    pub iframe: bool,
    pub session_lifetime_seconds: u64,
    pub registration_idle_seconds: u64,
    pub otp_cooldown_seconds: u64,
    pub otp_initial_bypass: bool,
}

impl Args {
    fn login_config(&self) -> LoginConfig {
        LoginConfig::new()
            .with_session_lifetime(Duration::from_secs(self.session_lifetime_seconds))
            .with_registration_idle(Duration::from_secs(self.registration_idle_seconds))
            .with_otp_resend(OtpResendPolicy::new(
                Duration::from_secs(self.otp_cooldown_seconds),
                self.otp_initial_bypass,
            ))
    }

    fn cookie_options(&self) -> CookieOptions {
        CookieOptions::new()
            .with_secure(self.public_url.scheme() == "https")
            .with_iframe(self.iframe)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the backend client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let backend_config =
        HttpBackendConfig::new(args.backend_url.clone(), args.backend_token.clone())
            .with_timeout(Duration::from_secs(args.backend_timeout_seconds));
    let backend = HttpIdentityBackend::new(&backend_config)
        .context("Failed to build identity backend client")?;

    debug!(backend = %args.backend_url, "identity backend configured");

    let flow = LoginFlow::new(Arc::new(backend), args.login_config());
    let state = LoginState::new(flow, args.public_url.clone())
        .with_cookie_options(args.cookie_options());

    info!(public_url = %args.public_url, iframe = args.iframe, "starting hosted login");

    let result = api::new(args.port, Arc::new(state)).await;

    telemetry::shutdown_tracer();

    result
}
