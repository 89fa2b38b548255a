//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action to run.

use crate::cli::actions::{verify::Args, Action};
use crate::cli::commands::{credential, verifier};
use anyhow::Result;

/// Map validated CLI matches to a verify action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let options = verifier::Options::parse(matches)?;
    let credential = credential::parse(matches)?;

    Ok(Action::Verify(Args {
        template: options.template,
        templates_dir: options.templates_dir,
        settings: options.settings,
        credential,
    }))
}
