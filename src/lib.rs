//! # wsauth (webservice credential verifier)
//!
//! `wsauth` verifies a username and password by delegating the decision to a
//! remote HTTP/SOAP webservice.
//!
//! ## Verification
//!
//! - **Request:** an XML template with `{{USER}}` and `{{PASSWORD}}`
//!   placeholders is rendered with the submitted credentials and POSTed to
//!   the configured endpoint, optionally with HTTP Basic authentication.
//! - **Decision:** the credentials are accepted when a configured regular
//!   expression matches anywhere in the response body. The status code is
//!   not consulted.
//! - **Attributes:** on success the user's identifier is always returned under
//!   the configured id field. Further attributes are extracted from the
//!   response with path expressions. Extraction problems are logged and never
//!   turn an accepted login into a failure.
//!
//! ## Hosting
//!
//! The library exposes the [`CredentialVerifier`] trait for host identity
//! frameworks. The `wsauth` binary is a thin CLI host that verifies one
//! credential and prints the attribute set as JSON.

pub mod cli;
pub mod error;
pub mod verifier;
pub mod xml;

pub use error::{AuthError, AuthErrorKind, ConfigError, ExtractionError, TransportError};
pub use verifier::{
    config::{FileTemplates, InlineTemplate, TemplateSource, VerifierConfig, VerifierSettings},
    evaluate::{AttributeSet, AttributeValue},
    request::Substitution,
    transport::{HttpTransport, Transport},
    Credential, CredentialVerifier, Verifier,
};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // non-git build environment
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
