//! Response evaluation: accept or reject, then attribute extraction.

use crate::error::{AuthError, ExtractionError};
use crate::xml::{
    xpath::{Namespaces, XPath},
    Document,
};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One entry of an attribute. Multi-line node text becomes a nested list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

/// Attribute name to values, as returned to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeMap<String, Vec<AttributeValue>>);

impl AttributeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<AttributeValue>) {
        self.0.insert(name.into(), values);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<AttributeValue>> {
        self.0
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = (&'a String, &'a Vec<AttributeValue>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<AttributeValue>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Whitespace stripped from node text before it becomes an attribute value.
const TRIMMED: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// Judge `response` and build the attribute set for `username`.
///
/// The response is accepted when `success_pattern` matches anywhere in it.
/// Attribute extraction problems never turn an accepted response into an
/// error; they are logged and whatever was extracted before is kept.
///
/// # Errors
/// Returns `AuthError::WrongCredentials` when the pattern does not match.
pub fn evaluate(
    response: &str,
    success_pattern: &Regex,
    id_field: &str,
    username: &str,
    attributes: &[(String, XPath)],
    namespaces: &Namespaces,
) -> Result<AttributeSet, AuthError> {
    if !success_pattern.is_match(response) {
        debug!("success pattern not found in response");
        return Err(AuthError::WrongCredentials);
    }

    let mut set = AttributeSet::new();
    set.insert(id_field, vec![AttributeValue::from(username)]);

    if attributes.is_empty() {
        return Ok(set);
    }

    if let Err(err) = extract(response, attributes, namespaces, &mut set) {
        warn!(error = %err, "attribute extraction failed, continuing with partial attributes");
    }

    Ok(set)
}

/// Evaluate each expression in order into `set`; stops at the first failure.
///
/// # Errors
/// Returns `ExtractionError` if the response does not parse or an expression
/// cannot be evaluated.
pub fn extract(
    response: &str,
    attributes: &[(String, XPath)],
    namespaces: &Namespaces,
    set: &mut AttributeSet,
) -> Result<(), ExtractionError> {
    let doc = Document::parse(response)?;

    for (name, xpath) in attributes {
        let nodes = xpath
            .select(&doc, namespaces)
            .map_err(|source| ExtractionError::Evaluate {
                attribute: name.clone(),
                source,
            })?;

        let values = nodes
            .into_iter()
            .map(|node| node_value(&doc.string_value(node)))
            .collect::<Vec<_>>();

        debug!(attribute = %name, values = values.len(), "attribute extracted");
        set.insert(name.clone(), values);
    }

    Ok(())
}

fn node_value(text: &str) -> AttributeValue {
    let value = text.trim_matches(TRIMMED);
    if value.contains('\n') {
        AttributeValue::Multi(value.split('\n').map(str::to_string).collect())
    } else {
        AttributeValue::Single(value.to_string())
    }
}
