pub mod backend;
pub mod logging;
pub mod login;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("hosted-login")
        .about("Hosted login session orchestration")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("HOSTED_LOGIN_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = backend::with_args(command);
    let command = login::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKEND_ENV: [(&str, Option<&str>); 2] = [
        ("HOSTED_LOGIN_BACKEND_URL", Some("https://idp.example.com")),
        ("HOSTED_LOGIN_BACKEND_TOKEN", Some("service-token")),
    ];

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "hosted-login");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Hosted login session orchestration".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_args() {
        temp_env::with_vars(
            [
                ("HOSTED_LOGIN_BACKEND_URL", None::<&str>),
                ("HOSTED_LOGIN_BACKEND_TOKEN", None),
                ("HOSTED_LOGIN_PORT", None),
            ],
            || {
                let matches = new().get_matches_from(vec![
                    "hosted-login",
                    "--port",
                    "9090",
                    "--backend-url",
                    "https://idp.example.com",
                    "--backend-token",
                    "service-token",
                    "--iframe",
                    "--otp-cooldown-seconds",
                    "30",
                ]);

                assert_eq!(matches.get_one::<u16>("port").copied(), Some(9090));
                assert_eq!(
                    matches
                        .get_one::<String>(backend::ARG_BACKEND_URL)
                        .map(String::as_str),
                    Some("https://idp.example.com")
                );
                assert!(matches.get_flag(login::ARG_IFRAME));
                assert_eq!(
                    matches
                        .get_one::<u64>(login::ARG_OTP_COOLDOWN_SECONDS)
                        .copied(),
                    Some(30)
                );
            },
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(BACKEND_ENV, || {
            let matches = new().get_matches_from(vec!["hosted-login"]);
            assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
            assert_eq!(
                matches
                    .get_one::<String>(login::ARG_PUBLIC_URL)
                    .map(String::as_str),
                Some("http://localhost:8080")
            );
            assert!(!matches.get_flag(login::ARG_IFRAME));
            assert_eq!(
                matches
                    .get_one::<u64>(login::ARG_SESSION_LIFETIME_SECONDS)
                    .copied(),
                Some(86_400)
            );
            assert_eq!(
                matches
                    .get_one::<bool>(login::ARG_OTP_INITIAL_BYPASS)
                    .copied(),
                Some(true)
            );
        });
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("HOSTED_LOGIN_BACKEND_URL", Some("https://idp.example.com")),
                ("HOSTED_LOGIN_BACKEND_TOKEN", Some("service-token")),
                ("HOSTED_LOGIN_PORT", Some("443")),
                ("HOSTED_LOGIN_PUBLIC_URL", Some("https://login.example.com")),
                ("HOSTED_LOGIN_LOG_LEVEL", Some("info")),
                ("HOSTED_LOGIN_LOG_FORMAT", Some("json")),
            ],
            || {
                let matches = new().get_matches_from(vec!["hosted-login"]);
                assert_eq!(matches.get_one::<u16>("port").copied(), Some(443));
                assert_eq!(
                    matches
                        .get_one::<String>(login::ARG_PUBLIC_URL)
                        .map(String::as_str),
                    Some("https://login.example.com")
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
                assert_eq!(
                    logging::log_format(&matches),
                    crate::cli::telemetry::LogFormat::Json
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(
                [
                    ("HOSTED_LOGIN_LOG_LEVEL", Some(level)),
                    ("HOSTED_LOGIN_BACKEND_URL", Some("https://idp.example.com")),
                    ("HOSTED_LOGIN_BACKEND_TOKEN", Some("service-token")),
                ],
                || {
                    let matches = new().get_matches_from(vec!["hosted-login"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_usize {
            temp_env::with_vars(
                [
                    ("HOSTED_LOGIN_LOG_LEVEL", None::<&str>),
                    ("HOSTED_LOGIN_BACKEND_URL", Some("https://idp.example.com")),
                    ("HOSTED_LOGIN_BACKEND_TOKEN", Some("service-token")),
                ],
                || {
                    let mut args = vec!["hosted-login".to_string()];
                    if index > 0 {
                        args.push(format!("-{}", "v".repeat(index)));
                    }

                    let matches = new().get_matches_from(args);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                },
            );
        }
    }

    #[test]
    fn test_missing_backend_token_is_an_error() {
        temp_env::with_vars(
            [
                ("HOSTED_LOGIN_BACKEND_URL", Some("https://idp.example.com")),
                ("HOSTED_LOGIN_BACKEND_TOKEN", None),
            ],
            || {
                let result = new().try_get_matches_from(vec!["hosted-login"]);
                assert!(result.is_err());
            },
        );
    }
}
