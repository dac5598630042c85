use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_BACKEND_URL: &str = "backend-url";
pub const ARG_BACKEND_TOKEN: &str = "backend-token";
pub const ARG_BACKEND_TIMEOUT_SECONDS: &str = "backend-timeout-seconds";

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub token: SecretString,
    pub timeout_seconds: u64,
}

impl Options {
    /// Parse identity backend arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            url: read_required(ARG_BACKEND_URL)?,
            token: SecretString::from(read_required(ARG_BACKEND_TOKEN)?),
            timeout_seconds: matches
                .get_one::<u64>(ARG_BACKEND_TIMEOUT_SECONDS)
                .copied()
                .unwrap_or(10),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BACKEND_URL)
                .long(ARG_BACKEND_URL)
                .help("Identity backend base URL, example: https://idp.example.com")
                .env("HOSTED_LOGIN_BACKEND_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_BACKEND_TOKEN)
                .long(ARG_BACKEND_TOKEN)
                .help("Service account token used to call the identity backend")
                .env("HOSTED_LOGIN_BACKEND_TOKEN")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_BACKEND_TIMEOUT_SECONDS)
                .long(ARG_BACKEND_TIMEOUT_SECONDS)
                .help("Timeout for identity backend requests in seconds")
                .env("HOSTED_LOGIN_BACKEND_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
