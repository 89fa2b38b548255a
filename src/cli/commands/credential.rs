use crate::verifier::Credential;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_USERNAME)
                .short('u')
                .long("username")
                .help("Username to verify")
                .env("WSAUTH_USERNAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long("password")
                .help("Password to verify")
                .env("WSAUTH_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
}

/// # Errors
/// Returns an error if the username or password is missing.
pub fn parse(matches: &ArgMatches) -> Result<Credential> {
    let username = matches
        .get_one::<String>(ARG_USERNAME)
        .cloned()
        .context("missing required argument: --username")?;
    let password = matches
        .get_one::<String>(ARG_PASSWORD)
        .cloned()
        .context("missing required argument: --password")?;

    Ok(Credential::new(username, SecretString::from(password)))
}
