//! Request body rendering.

use quick_xml::escape::escape;

pub const USER_PLACEHOLDER: &str = "{{USER}}";
pub const PASSWORD_PLACEHOLDER: &str = "{{PASSWORD}}";

/// How credentials are inserted into the template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Substitution {
    /// XML-escape credentials before insertion.
    #[default]
    XmlEscaped,
    /// Insert credentials verbatim. The template must stay well-formed for
    /// any credential, which callers cannot guarantee.
    Raw,
}

impl Substitution {
    #[must_use]
    pub fn render(self, template: &str, username: &str, password: &str) -> String {
        match self {
            Self::XmlEscaped => build_escaped(template, username, password),
            Self::Raw => build(template, username, password),
        }
    }
}

/// Replace every `{{USER}}` and `{{PASSWORD}}` in `template`, verbatim.
///
/// Substitution is a single pass over the template: a username or password
/// that itself contains `{{USER}}` or `{{PASSWORD}}` is inserted literally
/// and never expanded again.
#[must_use]
pub fn build(template: &str, username: &str, password: &str) -> String {
    substitute(template, username, password)
}

/// Like [`build`], with both credentials XML-escaped first.
#[must_use]
pub fn build_escaped(template: &str, username: &str, password: &str) -> String {
    substitute(template, &escape(username), &escape(password))
}

// Single pass: substituted values are never scanned for placeholders again.
fn substitute(template: &str, username: &str, password: &str) -> String {
    let mut out = String::with_capacity(template.len() + username.len() + password.len());
    let mut rest = template;

    loop {
        let user = rest.find(USER_PLACEHOLDER);
        let pass = rest.find(PASSWORD_PLACEHOLDER);

        let (index, placeholder, value) = match (user, pass) {
            (Some(u), Some(p)) if p < u => (p, PASSWORD_PLACEHOLDER, password),
            (Some(u), _) => (u, USER_PLACEHOLDER, username),
            (None, Some(p)) => (p, PASSWORD_PLACEHOLDER, password),
            (None, None) => break,
        };

        out.push_str(&rest[..index]);
        out.push_str(value);
        rest = &rest[index + placeholder.len()..];
    }

    out.push_str(rest);
    out
}
