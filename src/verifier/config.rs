//! Verifier configuration.
//!
//! `VerifierSettings` is the unvalidated input, filled in by the host (the CLI
//! in this crate). `VerifierConfig::try_from` validates it once; a config that
//! exists is always usable.

use super::request::Substitution;
use crate::error::ConfigError;
use crate::xml::xpath::{Namespaces, XPath};
use regex::{Regex, RegexBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;
use url::Url;

pub const DEFAULT_ID_FIELD: &str = "username";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Unvalidated verifier configuration.
#[derive(Clone, Default)]
pub struct VerifierSettings {
    pub url: Option<String>,
    /// Template content, already loaded.
    pub template: Option<String>,
    pub success_expr: Option<String>,
    pub id_field: Option<String>,
    pub basic_auth_user: Option<String>,
    pub basic_auth_password: Option<SecretString>,
    /// Attribute name and path expression, in evaluation order.
    pub attributes: Vec<(String, String)>,
    /// Namespace prefix and URI.
    pub namespaces: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub insecure_skip_tls_verify: bool,
    pub substitution: Substitution,
}

impl VerifierSettings {
    #[must_use]
    pub fn new(url: impl Into<String>, template: impl Into<String>, success_expr: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            template: Some(template.into()),
            success_expr: Some(success_expr.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = Some(id_field.into());
        self
    }

    #[must_use]
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: SecretString) -> Self {
        self.basic_auth_user = Some(user.into());
        self.basic_auth_password = Some(password);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.attributes.push((name.into(), expr.into()));
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push((prefix.into(), uri.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    #[must_use]
    pub fn with_substitution(mut self, substitution: Substitution) -> Self {
        self.substitution = substitution;
        self
    }
}

impl fmt::Debug for VerifierSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierSettings")
            .field("url", &self.url)
            .field("template", &self.template.as_ref().map(String::len))
            .field("success_expr", &self.success_expr)
            .field("id_field", &self.id_field)
            .field("basic_auth_user", &self.basic_auth_user)
            .field("basic_auth_password", &"***")
            .field("attributes", &self.attributes)
            .field("namespaces", &self.namespaces)
            .field("timeout", &self.timeout)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("substitution", &self.substitution)
            .finish()
    }
}

/// Credentials sent as HTTP Basic auth to the webservice itself.
#[derive(Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: SecretString,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub insecure_skip_tls_verify: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            insecure_skip_tls_verify: false,
        }
    }
}

/// Validated, immutable verifier configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    url: Url,
    template: String,
    success_pattern: Regex,
    id_field: String,
    basic_auth: Option<BasicAuth>,
    attributes: Vec<(String, XPath)>,
    namespaces: Namespaces,
    transport: TransportSettings,
    substitution: Substitution,
}

impl VerifierConfig {
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub fn success_pattern(&self) -> &Regex {
        &self.success_pattern
    }

    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    #[must_use]
    pub fn basic_auth(&self) -> Option<&BasicAuth> {
        self.basic_auth.as_ref()
    }

    #[must_use]
    pub fn attributes(&self) -> &[(String, XPath)] {
        &self.attributes
    }

    #[must_use]
    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    #[must_use]
    pub fn transport(&self) -> TransportSettings {
        self.transport
    }

    #[must_use]
    pub fn substitution(&self) -> Substitution {
        self.substitution
    }
}

impl TryFrom<VerifierSettings> for VerifierConfig {
    type Error = ConfigError;

    fn try_from(settings: VerifierSettings) -> Result<Self, Self::Error> {
        let raw_url = settings.url.ok_or(ConfigError::MissingField("url"))?;
        let url = parse_url(&raw_url)?;

        let template = settings
            .template
            .ok_or(ConfigError::MissingField("template"))?;
        if template.is_empty() {
            return Err(ConfigError::EmptyTemplate);
        }

        let success_expr = settings
            .success_expr
            .ok_or(ConfigError::MissingField("success_expr"))?;
        let success_pattern = compile_pattern(&success_expr)?;

        let id_field = settings
            .id_field
            .unwrap_or_else(|| DEFAULT_ID_FIELD.to_string());
        if id_field.is_empty() {
            return Err(ConfigError::EmptyIdField);
        }

        let basic_auth = match (settings.basic_auth_user, settings.basic_auth_password) {
            (Some(user), Some(password)) if !user.is_empty() => Some(BasicAuth { user, password }),
            (None, None) => None,
            (Some(user), None) if user.is_empty() => None,
            (None, Some(password)) if password.expose_secret().is_empty() => None,
            _ => return Err(ConfigError::IncompleteBasicAuth),
        };

        let namespaces: Namespaces = settings.namespaces.into_iter().collect();

        let mut attributes: Vec<(String, XPath)> = Vec::with_capacity(settings.attributes.len());
        for (name, expr) in settings.attributes {
            if name == id_field {
                return Err(ConfigError::ReservedAttribute(name));
            }
            let xpath = XPath::compile(&expr).map_err(|source| ConfigError::InvalidExpression {
                attribute: name.clone(),
                source,
            })?;
            if let Some(prefix) = xpath
                .prefixes()
                .into_iter()
                .find(|prefix| !namespaces.contains_key(*prefix))
            {
                return Err(ConfigError::InvalidExpression {
                    attribute: name,
                    source: crate::xml::xpath::XPathError::UnboundPrefix(prefix.to_string()),
                });
            }
            // a repeated name replaces the earlier expression in place
            match attributes.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = xpath,
                None => attributes.push((name, xpath)),
            }
        }

        let transport = TransportSettings {
            timeout: settings.timeout.unwrap_or(DEFAULT_TIMEOUT),
            insecure_skip_tls_verify: settings.insecure_skip_tls_verify,
        };

        debug!(
            url = %url,
            id_field = %id_field,
            attributes = attributes.len(),
            namespaces = namespaces.len(),
            "verifier configuration validated"
        );

        Ok(Self {
            url,
            template,
            success_pattern,
            id_field,
            basic_auth,
            attributes,
            namespaces,
            transport,
            substitution: settings.substitution,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {scheme}"),
        }),
    }
}

/// Compile a success expression.
///
/// Accepts a plain regex or a delimited pattern such as `/<status>OK<\/status>/i`.
///
/// In a delimited pattern without the `m` or `D` flag, `$` also matches
/// before a newline that ends the body, so `/OK$/` accepts `"OK\n"`. `D`
/// restricts `$` to the very end. Plain patterns use `regex` syntax as is.
///
/// # Errors
/// Returns `ConfigError::InvalidPattern` on an empty pattern, an unknown flag
/// or a regex syntax error.
pub fn compile_pattern(expr: &str) -> Result<Regex, ConfigError> {
    if expr.is_empty() {
        return Err(ConfigError::InvalidPattern("pattern is empty".to_string()));
    }

    let (body, flags) = match split_delimited(expr) {
        Some((body, flags)) if !flags.contains(['m', 'D']) => {
            (end_before_final_newline(&body), flags)
        }
        Some(delimited) => delimited,
        None => (expr.to_string(), ""),
    };

    let mut builder = RegexBuilder::new(&body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            // UTF-8 is always on; `D` only changes how `$` is rewritten
            'u' | 'D' => &mut builder,
            other => {
                return Err(ConfigError::InvalidPattern(format!(
                    "unsupported pattern flag '{other}'"
                )))
            }
        };
    }

    builder
        .build()
        .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
}

/// Delimiters recognised around a success expression. Brackets and `<` are
/// left out so bare patterns such as `<status>OK</status>` keep their meaning.
const PATTERN_DELIMITERS: &[char] = &['/', '#', '~', '!', '@', '%', ';', ',', ':', '='];

/// Split `/body/flags` into an unescaped body and its flags.
fn split_delimited(expr: &str) -> Option<(String, &str)> {
    let open = expr.chars().next()?;
    if !PATTERN_DELIMITERS.contains(&open) {
        return None;
    }
    let close = open;

    let end = expr.rfind(close)?;
    if end < open.len_utf8() {
        return None;
    }
    let flags = &expr[end + close.len_utf8()..];
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let inner = &expr[open.len_utf8()..end];
    let mut body = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some(&next) if next == open => {
                    body.push(next);
                    chars.next();
                }
                Some(&next) => {
                    body.push('\\');
                    body.push(next);
                    chars.next();
                }
                None => body.push('\\'),
            }
        } else {
            body.push(c);
        }
    }

    Some((body, flags))
}

/// Rewrite every `$` outside a character class as `(?:\n?\z)`.
fn end_before_final_newline(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' if !in_class => {
                in_class = true;
                out.push(c);
                // `[]...]` and `[^]...]` start with a literal `]`
                if chars.peek() == Some(&'^') {
                    out.push('^');
                    chars.next();
                }
                if chars.peek() == Some(&']') {
                    out.push(']');
                    chars.next();
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            '$' if !in_class => out.push_str(r"(?:\n?\z)"),
            _ => out.push(c),
        }
    }

    out
}

/// Supplies request template content by name.
pub trait TemplateSource {
    /// # Errors
    /// Returns `ConfigError` if the template cannot be found or read.
    fn load(&self, name: &str) -> Result<String, ConfigError>;
}

/// Templates stored as files in a directory.
#[derive(Debug, Clone)]
pub struct FileTemplates {
    dir: PathBuf,
}

impl FileTemplates {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TemplateSource for FileTemplates {
    fn load(&self, name: &str) -> Result<String, ConfigError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(ConfigError::TemplateNotFound(path.display().to_string()));
        }
        std::fs::read_to_string(&path).map_err(|source| ConfigError::TemplateRead {
            path: path.display().to_string(),
            source,
        })
    }
}

/// A single template held in memory, whatever the requested name.
#[derive(Debug, Clone)]
pub struct InlineTemplate(pub String);

impl TemplateSource for InlineTemplate {
    fn load(&self, _name: &str) -> Result<String, ConfigError> {
        Ok(self.0.clone())
    }
}
