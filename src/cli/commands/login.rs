use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_PUBLIC_URL: &str = "public-url";
pub const ARG_IFRAME: &str = "iframe";
pub const ARG_SESSION_LIFETIME_SECONDS: &str = "session-lifetime-seconds";
pub const ARG_REGISTRATION_IDLE_SECONDS: &str = "registration-idle-seconds";
pub const ARG_OTP_COOLDOWN_SECONDS: &str = "otp-cooldown-seconds";
pub const ARG_OTP_INITIAL_BYPASS: &str = "otp-initial-bypass";

#[derive(Debug)]
pub struct Options {
    pub public_url: String,
    pub iframe: bool,
    pub session_lifetime_seconds: u64,
    pub registration_idle_seconds: u64,
    pub otp_cooldown_seconds: u64,
    pub otp_initial_bypass: bool,
}

impl Options {
    /// Parse login flow arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the public URL is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds =
            |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Ok(Self {
            public_url: matches
                .get_one::<String>(ARG_PUBLIC_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_PUBLIC_URL}"))?,
            iframe: matches.get_flag(ARG_IFRAME),
            session_lifetime_seconds: seconds(ARG_SESSION_LIFETIME_SECONDS, 86_400),
            registration_idle_seconds: seconds(ARG_REGISTRATION_IDLE_SECONDS, 3_600),
            otp_cooldown_seconds: seconds(ARG_OTP_COOLDOWN_SECONDS, 60),
            otp_initial_bypass: matches
                .get_one::<bool>(ARG_OTP_INITIAL_BYPASS)
                .copied()
                .unwrap_or(true),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_URL)
                .long(ARG_PUBLIC_URL)
                .help("Public URL of the login UI, used for CORS and WebAuthn origins")
                .env("HOSTED_LOGIN_PUBLIC_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_IFRAME)
                .long(ARG_IFRAME)
                .help("Allow the login UI inside an iframe (SameSite=None cookies)")
                .env("HOSTED_LOGIN_IFRAME")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SESSION_LIFETIME_SECONDS)
                .long(ARG_SESSION_LIFETIME_SECONDS)
                .help("Lifetime of login session references in seconds")
                .env("HOSTED_LOGIN_SESSION_LIFETIME_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_IDLE_SECONDS)
                .long(ARG_REGISTRATION_IDLE_SECONDS)
                .help("Idle expiry for invitation and registration session references in seconds")
                .env("HOSTED_LOGIN_REGISTRATION_IDLE_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_COOLDOWN_SECONDS)
                .long(ARG_OTP_COOLDOWN_SECONDS)
                .help("Minimum time before an email or SMS code is sent again")
                .env("HOSTED_LOGIN_OTP_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_INITIAL_BYPASS)
                .long(ARG_OTP_INITIAL_BYPASS)
                .help("Send a code on the first render of a verification step regardless of cooldown")
                .env("HOSTED_LOGIN_OTP_INITIAL_BYPASS")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
}
