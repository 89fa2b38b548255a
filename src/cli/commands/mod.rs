pub mod credential;
pub mod logging;
pub mod verifier;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    ColorChoice, Command,
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

    let command = Command::new("wsauth")
        .about("Verify credentials against a remote webservice")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles);

    let command = verifier::with_args(command);
    let command = credential::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::verifier::request::Substitution;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    const ENV: [&str; 15] = [
        "WSAUTH_URL",
        "WSAUTH_TEMPLATE",
        "WSAUTH_TEMPLATES_DIR",
        "WSAUTH_SUCCESS_EXPR",
        "WSAUTH_IDFIELD",
        "WSAUTH_AUTHBASIC_USER",
        "WSAUTH_AUTHBASIC_PASSWORD",
        "WSAUTH_TIMEOUT",
        "WSAUTH_INSECURE",
        "WSAUTH_RAW_SUBSTITUTION",
        "WSAUTH_USERNAME",
        "WSAUTH_PASSWORD",
        "WSAUTH_LOG_LEVEL",
        "WSAUTH_LOG_FORMAT",
        "RUST_LOG",
    ];

    // Run `f` with every WSAUTH_* variable cleared except those in `set`
    fn with_env<F, R>(set: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let vars: Vec<(&str, Option<&str>)> = ENV
            .iter()
            .map(|&key| {
                let value = set.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
                (key, value)
            })
            .collect();
        temp_env::with_vars(vars, f)
    }

    fn with_cleared_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_env(&[], f)
    }

    fn required_args() -> Vec<String> {
        [
            "wsauth",
            "--url",
            "https://ws.tld/auth",
            "--template",
            "login.xml",
            "--success-expr",
            r"/<status>OK<\/status>/",
            "--username",
            "alice",
            "--password",
            "s3cret",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "wsauth");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Verify credentials against a remote webservice".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        with_cleared_env(|| {
            let matches = new().get_matches_from(required_args());
            let options = verifier::Options::parse(&matches).unwrap();

            assert_eq!(options.template, "login.xml");
            assert_eq!(options.templates_dir, "templates");
            assert_eq!(options.settings.url.as_deref(), Some("https://ws.tld/auth"));
            assert_eq!(options.settings.template, None);
            assert_eq!(options.settings.id_field.as_deref(), Some("username"));
            assert_eq!(options.settings.timeout, Some(Duration::from_secs(60)));
            assert!(!options.settings.insecure_skip_tls_verify);
            assert_eq!(options.settings.substitution, Substitution::XmlEscaped);
            assert!(options.settings.attributes.is_empty());
            assert!(options.settings.basic_auth_user.is_none());

            assert_eq!(
                logging::log_format(&matches).unwrap(),
                crate::cli::telemetry::LogFormat::Text
            );

            let credential = credential::parse(&matches).unwrap();
            assert_eq!(credential.username, "alice");
            assert_eq!(credential.password.expose_secret(), "s3cret");
        });
    }

    #[test]
    fn test_attributes_and_namespaces() {
        with_cleared_env(|| {
            let mut args = required_args();
            args.extend(
                [
                    "--attr",
                    "fullname=//name",
                    "--attr",
                    "mail=//auth:user[@type='primary']/auth:mail",
                    "--namespace",
                    "auth=urn:auth",
                    "--raw-substitution",
                    "--insecure",
                    "--timeout",
                    "5",
                ]
                .iter()
                .map(ToString::to_string),
            );
            let matches = new().get_matches_from(args);
            let options = verifier::Options::parse(&matches).unwrap();

            assert_eq!(
                options.settings.attributes,
                vec![
                    ("fullname".to_string(), "//name".to_string()),
                    (
                        "mail".to_string(),
                        "//auth:user[@type='primary']/auth:mail".to_string()
                    ),
                ]
            );
            assert_eq!(
                options.settings.namespaces,
                vec![("auth".to_string(), "urn:auth".to_string())]
            );
            assert_eq!(options.settings.substitution, Substitution::Raw);
            assert!(options.settings.insecure_skip_tls_verify);
            assert_eq!(options.settings.timeout, Some(Duration::from_secs(5)));
        });
    }

    #[test]
    fn test_check_env() {
        with_env(
            &[
                ("WSAUTH_URL", "https://ws.tld/auth"),
                ("WSAUTH_TEMPLATE", "login.xml"),
                ("WSAUTH_TEMPLATES_DIR", "/etc/wsauth"),
                ("WSAUTH_SUCCESS_EXPR", "OK"),
                ("WSAUTH_IDFIELD", "uid"),
                ("WSAUTH_AUTHBASIC_USER", "svc"),
                ("WSAUTH_AUTHBASIC_PASSWORD", "hunter2"),
                ("WSAUTH_USERNAME", "alice"),
                ("WSAUTH_PASSWORD", "s3cret"),
                ("WSAUTH_LOG_LEVEL", "info"),
                ("WSAUTH_LOG_FORMAT", "json"),
            ],
            || {
                let matches = new().get_matches_from(vec!["wsauth"]);
                let options = verifier::Options::parse(&matches).unwrap();

                assert_eq!(options.templates_dir, "/etc/wsauth");
                assert_eq!(options.settings.id_field.as_deref(), Some("uid"));
                assert_eq!(options.settings.basic_auth_user.as_deref(), Some("svc"));
                assert_eq!(
                    options
                        .settings
                        .basic_auth_password
                        .as_ref()
                        .map(|p| p.expose_secret().to_string()),
                    Some("hunter2".to_string())
                );
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
                assert_eq!(
                    logging::log_format(&matches).unwrap(),
                    crate::cli::telemetry::LogFormat::Json
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        // loop cover all possible value_parse
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            with_env(&[("WSAUTH_LOG_LEVEL", level)], || {
                let matches = new().get_matches_from(required_args());
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, _) in levels.iter().enumerate() {
            with_cleared_env(|| {
                let mut args = required_args();

                // Add the appropriate number of "-v" flags based on the index
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_missing_required_args_fail() {
        with_cleared_env(|| {
            let result = new().try_get_matches_from(vec!["wsauth", "--url", "https://ws.tld"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_basic_auth_requires_both() {
        with_cleared_env(|| {
            let mut args = required_args();
            args.extend(["--authbasic-user".to_string(), "svc".to_string()]);
            let result = new().try_get_matches_from(args);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn test_invalid_key_value_fails() {
        with_cleared_env(|| {
            for bad in ["fullname", "=//name", "fullname="] {
                let mut args = required_args();
                args.extend(["--attr".to_string(), bad.to_string()]);
                let result = new().try_get_matches_from(args);
                assert_eq!(
                    result.map_err(|e| e.kind()).err(),
                    Some(clap::error::ErrorKind::ValueValidation),
                    "{bad}"
                );
            }
        });
    }

    #[test]
    fn test_invalid_log_format_fails() {
        with_cleared_env(|| {
            let mut args = required_args();
            args.extend(["--log-format".to_string(), "yaml".to_string()]);
            let result = new().try_get_matches_from(args);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::InvalidValue)
            );
        });
    }

    #[test]
    fn test_zero_timeout_fails() {
        with_cleared_env(|| {
            let mut args = required_args();
            args.extend(["--timeout".to_string(), "0".to_string()]);
            let result = new().try_get_matches_from(args);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::ValueValidation)
            );
        });
    }
}
