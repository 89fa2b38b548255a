use crate::verifier::{config::VerifierSettings, request::Substitution};
use anyhow::{Context, Result};
use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_URL: &str = "url";
pub const ARG_TEMPLATE: &str = "template";
pub const ARG_TEMPLATES_DIR: &str = "templates-dir";
pub const ARG_SUCCESS_EXPR: &str = "success-expr";
pub const ARG_IDFIELD: &str = "idfield";
pub const ARG_AUTHBASIC_USER: &str = "authbasic-user";
pub const ARG_AUTHBASIC_PASSWORD: &str = "authbasic-password";
pub const ARG_ATTR: &str = "attr";
pub const ARG_NAMESPACE: &str = "namespace";
pub const ARG_TIMEOUT: &str = "timeout";
pub const ARG_INSECURE: &str = "insecure";
pub const ARG_RAW_SUBSTITUTION: &str = "raw-substitution";

/// Parse `name=value`, splitting on the first `=`.
#[must_use]
pub fn validator_key_value() -> ValueParser {
    ValueParser::from(
        move |pair: &str| -> std::result::Result<(String, String), String> {
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() && !value.is_empty() => {
                    Ok((key.trim().to_string(), value.to_string()))
                }
                _ => Err(format!("expected name=value, got: {pair}")),
            }
        },
    )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_URL)
                .long("url")
                .help("Webservice endpoint, example: https://ws.tld/auth")
                .env("WSAUTH_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TEMPLATE)
                .long("template")
                .help("Request template file name, relative to --templates-dir")
                .env("WSAUTH_TEMPLATE")
                .required(true),
        )
        .arg(
            Arg::new(ARG_TEMPLATES_DIR)
                .long("templates-dir")
                .help("Directory holding request templates")
                .env("WSAUTH_TEMPLATES_DIR")
                .default_value("templates"),
        )
        .arg(
            Arg::new(ARG_SUCCESS_EXPR)
                .long("success-expr")
                .help("Regular expression that must match the response for the login to succeed")
                .long_help(
                    "Regular expression that must match somewhere in the response body for the login to succeed. Either a bare regex or a delimited pattern such as /<status>OK<\\/status>/i",
                )
                .env("WSAUTH_SUCCESS_EXPR")
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDFIELD)
                .long("idfield")
                .help("Attribute name that receives the username")
                .env("WSAUTH_IDFIELD")
                .default_value(crate::verifier::config::DEFAULT_ID_FIELD),
        )
        .arg(
            Arg::new(ARG_AUTHBASIC_USER)
                .long("authbasic-user")
                .help("HTTP Basic user for the webservice")
                .env("WSAUTH_AUTHBASIC_USER")
                .requires(ARG_AUTHBASIC_PASSWORD),
        )
        .arg(
            Arg::new(ARG_AUTHBASIC_PASSWORD)
                .long("authbasic-password")
                .help("HTTP Basic password for the webservice")
                .env("WSAUTH_AUTHBASIC_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_AUTHBASIC_USER),
        )
        .arg(
            Arg::new(ARG_ATTR)
                .long("attr")
                .help("Attribute to extract, as name=expression (repeatable)")
                .value_name("NAME=EXPR")
                .action(ArgAction::Append)
                .value_parser(validator_key_value()),
        )
        .arg(
            Arg::new(ARG_NAMESPACE)
                .long("namespace")
                .help("Namespace binding for expressions, as prefix=uri (repeatable)")
                .value_name("PREFIX=URI")
                .action(ArgAction::Append)
                .value_parser(validator_key_value()),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long("timeout")
                .help("Request timeout in seconds")
                .env("WSAUTH_TIMEOUT")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_INSECURE)
                .long("insecure")
                .help("Skip TLS certificate verification")
                .env("WSAUTH_INSECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RAW_SUBSTITUTION)
                .long("raw-substitution")
                .help("Insert credentials into the template without XML escaping")
                .env("WSAUTH_RAW_SUBSTITUTION")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug)]
pub struct Options {
    pub template: String,
    pub templates_dir: String,
    pub settings: VerifierSettings,
}

impl Options {
    /// Collect verifier settings from the matches. The template body is left
    /// unset, it is loaded from `templates_dir` by the action.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_URL)
            .cloned()
            .context("missing required argument: --url")?;
        let success_expr = matches
            .get_one::<String>(ARG_SUCCESS_EXPR)
            .cloned()
            .context("missing required argument: --success-expr")?;
        let template = matches
            .get_one::<String>(ARG_TEMPLATE)
            .cloned()
            .context("missing required argument: --template")?;
        let templates_dir = matches
            .get_one::<String>(ARG_TEMPLATES_DIR)
            .cloned()
            .unwrap_or_else(|| "templates".to_string());

        let pairs = |id: &str| -> Vec<(String, String)> {
            matches
                .get_many::<(String, String)>(id)
                .map(|values| values.cloned().collect())
                .unwrap_or_default()
        };

        let substitution = if matches.get_flag(ARG_RAW_SUBSTITUTION) {
            Substitution::Raw
        } else {
            Substitution::XmlEscaped
        };

        let settings = VerifierSettings {
            url: Some(url),
            template: None,
            success_expr: Some(success_expr),
            id_field: matches.get_one::<String>(ARG_IDFIELD).cloned(),
            basic_auth_user: matches.get_one::<String>(ARG_AUTHBASIC_USER).cloned(),
            basic_auth_password: matches
                .get_one::<String>(ARG_AUTHBASIC_PASSWORD)
                .cloned()
                .map(SecretString::from),
            attributes: pairs(ARG_ATTR),
            namespaces: pairs(ARG_NAMESPACE),
            timeout: matches
                .get_one::<u64>(ARG_TIMEOUT)
                .copied()
                .map(Duration::from_secs),
            insecure_skip_tls_verify: matches.get_flag(ARG_INSECURE),
            substitution,
        };

        Ok(Self {
            template,
            templates_dir,
            settings,
        })
    }
}
