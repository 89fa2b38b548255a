//! Outbound call to the authentication webservice.
//!
//! One POST per verification. There are no retries and the status code is not
//! inspected: the body is handed to the evaluator whatever the status, since
//! only its content decides the outcome.

use super::config::{BasicAuth, TransportSettings};
use crate::error::{ConfigError, TransportError};
use reqwest::{
    header::{ACCEPT, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, PRAGMA},
    Client,
};
use secrecy::ExposeSecret;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

pub const XML_CONTENT_TYPE: &str = "text/xml;charset=\"utf-8\"";

/// A rendered request, ready to send.
#[derive(Debug)]
pub struct OutboundRequest<'a> {
    pub url: &'a Url,
    pub body: String,
    pub basic_auth: Option<&'a BasicAuth>,
}

/// Sends a rendered request and returns the raw response body.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    /// # Errors
    /// Returns `TransportError` on network failure, timeout or an unreadable body.
    async fn send(&self, request: OutboundRequest<'_>) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build the HTTP client.
    ///
    /// # Errors
    /// Returns `ConfigError::Client` if the TLS backend cannot be initialized.
    pub fn new(settings: TransportSettings) -> Result<Self, ConfigError> {
        if settings.insecure_skip_tls_verify {
            warn!("TLS certificate verification is disabled for the webservice endpoint");
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.insecure_skip_tls_verify)
            .build()
            .map_err(ConfigError::Client)?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest<'_>) -> Result<String, TransportError> {
        let span = info_span!(
            "webservice.request",
            http.method = "POST",
            url = %request.url,
            basic_auth = request.basic_auth.is_some()
        );

        let mut builder = self
            .client
            .post(request.url.clone())
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header(ACCEPT, "text/xml")
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .header(CONTENT_LENGTH, request.body.len())
            .body(request.body);

        if let Some(auth) = request.basic_auth {
            builder = builder.basic_auth(&auth.user, Some(auth.password.expose_secret()));
        }

        let response = builder
            .send()
            .instrument(span)
            .await
            .map_err(TransportError::from_send)?;

        let status = response.status();
        debug!(status = %status, "webservice responded");

        response.text().await.map_err(TransportError::from_body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;
    use base64ct::{Base64, Encoding};
    use secrecy::SecretString;
    use std::net::TcpListener;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[tokio::test]
    async fn send_posts_xml_with_headers() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let body = "<req><u>alice</u></req>";
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("content-type", XML_CONTENT_TYPE))
            .and(header("accept", "text/xml"))
            .and(header("cache-control", "no-cache"))
            .and(header("pragma", "no-cache"))
            .and(header("content-length", body.len().to_string().as_str()))
            .and(body_string(body))
            .respond_with(ResponseTemplate::new(200).set_body_string("<status>OK</status>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/auth", server.uri()))?;
        let transport = HttpTransport::new(TransportSettings::default())?;
        let response = transport
            .send(OutboundRequest {
                url: &url,
                body: body.to_string(),
                basic_auth: None,
            })
            .await?;
        assert_eq!(response, "<status>OK</status>");
        Ok(())
    }

    #[tokio::test]
    async fn send_attaches_basic_auth() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        let expected = format!("Basic {}", Base64::encode_string(b"svc:hunter2"));
        Mock::given(method("POST"))
            .and(header("authorization", expected.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri())?;
        let auth = BasicAuth {
            user: "svc".to_string(),
            password: SecretString::from("hunter2".to_string()),
        };
        let transport = HttpTransport::new(TransportSettings::default())?;
        let response = transport
            .send(OutboundRequest {
                url: &url,
                body: String::new(),
                basic_auth: Some(&auth),
            })
            .await?;
        assert_eq!(response, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn send_returns_body_on_error_status() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("<fault>boom</fault>"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri())?;
        let transport = HttpTransport::new(TransportSettings::default())?;
        let response = transport
            .send(OutboundRequest {
                url: &url,
                body: "<x/>".to_string(),
                basic_auth: None,
            })
            .await?;
        assert_eq!(response, "<fault>boom</fault>");
        Ok(())
    }

    #[tokio::test]
    async fn send_times_out() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri())?;
        let transport = HttpTransport::new(TransportSettings {
            timeout: Duration::from_millis(200),
            insecure_skip_tls_verify: false,
        })?;
        let result = transport
            .send(OutboundRequest {
                url: &url,
                body: String::new(),
                basic_auth: None,
            })
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        Ok(())
    }

    #[tokio::test]
    async fn send_reports_connection_failure() -> Result<()> {
        // bind then drop to get a port nobody listens on
        let port = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener.local_addr()?.port(),
            Err(_) => {
                eprintln!("Skipping test: cannot bind localhost");
                return Ok(());
            }
        };

        let url = Url::parse(&format!("http://127.0.0.1:{port}/auth"))?;
        let transport = HttpTransport::new(TransportSettings::default())?;
        let result = transport
            .send(OutboundRequest {
                url: &url,
                body: String::new(),
                basic_auth: None,
            })
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        Ok(())
    }

    #[test]
    fn insecure_client_builds() {
        assert!(HttpTransport::new(TransportSettings {
            timeout: Duration::from_secs(1),
            insecure_skip_tls_verify: true,
        })
        .is_ok());
    }
}
