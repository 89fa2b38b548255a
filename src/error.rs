//! Error taxonomy for the verifier.
//!
//! `ConfigError` is raised while building a [`crate::VerifierConfig`] and is
//! fatal. `TransportError` and `AuthError` are raised per verification call.
//! `ExtractionError` never leaves the crate: it is logged and discarded when
//! attribute extraction fails on an accepted response.

use crate::xml::{xpath::XPathError, XmlError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required attribute '{0}'")]
    MissingField(&'static str),
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid success expression: {0}")]
    InvalidPattern(String),
    #[error("basic auth requires both a username and a password")]
    IncompleteBasicAuth,
    #[error("request template is empty")]
    EmptyTemplate,
    #[error("template file not found: {0}")]
    TemplateNotFound(String),
    #[error("failed to read template {path}: {source}")]
    TemplateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid path expression for attribute '{attribute}': {source}")]
    InvalidExpression {
        attribute: String,
        #[source]
        source: XPathError,
    },
    #[error("identifier field name is empty")]
    EmptyIdField,
    #[error("attribute '{0}' collides with the identifier field")]
    ReservedAttribute(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

impl TransportError {
    /// Classify a reqwest error raised while sending the request.
    #[must_use]
    pub fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Request(err)
        }
    }

    /// Classify a reqwest error raised while reading the response body.
    #[must_use]
    pub fn from_body(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Body(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    WrongCredentials,
    InternalFailure,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("wrong username or password")]
    WrongCredentials,
    #[error("internal failure: {0}")]
    Config(#[from] ConfigError),
    #[error("internal failure: {0}")]
    Transport(#[from] TransportError),
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::WrongCredentials => AuthErrorKind::WrongCredentials,
            Self::Config(_) | Self::Transport(_) => AuthErrorKind::InternalFailure,
        }
    }

    #[must_use]
    pub fn is_wrong_credentials(&self) -> bool {
        self.kind() == AuthErrorKind::WrongCredentials
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("response is not well-formed XML: {0}")]
    Parse(#[from] XmlError),
    #[error("failed to evaluate expression for attribute '{attribute}': {source}")]
    Evaluate {
        attribute: String,
        #[source]
        source: XPathError,
    },
}
