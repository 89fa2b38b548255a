//! Credential verification against a remote webservice.
//!
//! Flow Overview:
//! - Render the request template with the submitted credentials (`request`).
//! - POST it to the configured endpoint (`transport`).
//! - Search the body for the success pattern and, on a match, extract the
//!   configured attributes from it (`evaluate`).
//!
//! A `Verifier` holds only its immutable configuration and transport, so one
//! instance can serve any number of concurrent verifications.

pub mod config;
pub mod evaluate;
pub mod request;
pub mod transport;

use self::{
    config::{VerifierConfig, VerifierSettings},
    evaluate::{evaluate, AttributeSet},
    transport::{HttpTransport, OutboundRequest, Transport},
};
use crate::error::{AuthError, ConfigError};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};
use tracing::{error, info, instrument};

/// Username and password submitted by the user.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: SecretString,
}

impl Credential {
    #[must_use]
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &"***")
            .field("password", &"***")
            .finish()
    }
}

/// Entry point used by the host identity framework.
#[allow(async_fn_in_trait)]
pub trait CredentialVerifier {
    /// Verify `credential` and return the user's attributes.
    ///
    /// # Errors
    /// `AuthError::WrongCredentials` when the webservice rejects the
    /// credential, any other variant for internal failures.
    async fn verify(&self, credential: &Credential) -> Result<AttributeSet, AuthError>;
}

#[derive(Debug, Clone)]
pub struct Verifier<T = HttpTransport> {
    config: Arc<VerifierConfig>,
    transport: T,
}

impl Verifier<HttpTransport> {
    /// Build a verifier that talks HTTP(S).
    ///
    /// # Errors
    /// Returns `ConfigError` if the HTTP client cannot be built.
    pub fn new(config: VerifierConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(config.transport())?;
        Ok(Self::with_transport(config, transport))
    }

    /// Validate `settings` and build an HTTP(S) verifier.
    ///
    /// # Errors
    /// Returns `ConfigError` if the settings are invalid.
    pub fn from_settings(settings: VerifierSettings) -> Result<Self, ConfigError> {
        Self::new(VerifierConfig::try_from(settings)?)
    }
}

impl<T: Transport> Verifier<T> {
    #[must_use]
    pub fn with_transport(config: VerifierConfig, transport: T) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Request body that would be sent for `credential`.
    #[must_use]
    pub fn render(&self, credential: &Credential) -> String {
        self.config.substitution().render(
            self.config.template(),
            &credential.username,
            credential.password.expose_secret(),
        )
    }
}

impl<T: Transport> CredentialVerifier for Verifier<T> {
    #[instrument(skip_all, fields(url = %self.config.url(), id_field = %self.config.id_field()))]
    async fn verify(&self, credential: &Credential) -> Result<AttributeSet, AuthError> {
        let request = OutboundRequest {
            url: self.config.url(),
            body: self.render(credential),
            basic_auth: self.config.basic_auth(),
        };

        let response = self.transport.send(request).await.map_err(|e| {
            error!(error = %e, "webservice request failed");
            e
        })?;

        let result = evaluate(
            &response,
            self.config.success_pattern(),
            self.config.id_field(),
            &credential.username,
            self.config.attributes(),
            self.config.namespaces(),
        );

        match &result {
            Ok(attributes) => info!(
                attributes = %attributes.names().collect::<Vec<_>>().join(","),
                "credentials accepted"
            ),
            Err(_) => info!("credentials rejected"),
        }

        result
    }
}
