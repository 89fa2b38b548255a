//! Minimal namespace-aware XML tree.
//!
//! Responses are parsed with `quick_xml`'s `NsReader` into an arena of nodes
//! stored in document order, which is what the path evaluator in [`xpath`]
//! walks. Every element and attribute carries its expanded name (namespace
//! URI plus local name), so prefixes in the response never leak into path
//! evaluation.
//!
//! The body is parsed as a fragment: several top-level elements are accepted,
//! text outside any element is not.
//!
//! Line endings are normalized before parsing (`\r\n` and a lone `\r` both
//! become `\n`), and literal whitespace in attribute values becomes a space.
//! Character references such as `&#13;` are kept as written. Elements nested
//! deeper than [`MAX_DEPTH`] are rejected.

pub mod xpath;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::borrow::Cow;
use thiserror::Error;

/// Deepest element nesting accepted by [`Document::parse`].
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: u64, message: String },
    #[error("unknown namespace prefix '{0}'")]
    UnknownPrefix(String),
    #[error("unexpected closing tag '{0}'")]
    UnexpectedClose(String),
    #[error("unclosed element '{0}'")]
    Unclosed(String),
    #[error("text outside of any element")]
    TextOutsideElement,
    #[error("document has no element")]
    Empty,
    #[error("elements nested deeper than {0} levels")]
    TooDeep(usize),
}

pub type NodeId = usize;

/// Namespace URI (if any) plus local name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(ExpandedName),
    Attribute { name: ExpandedName, value: String },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// Parse `input`, rejecting anything that is not well-formed.
    ///
    /// # Errors
    /// Returns `XmlError` on syntax errors, unbalanced tags, undeclared
    /// prefixes, stray text, nesting beyond [`MAX_DEPTH`] or when no element
    /// is present.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let input = normalize_line_endings(input);
        let mut reader = NsReader::from_str(&input);
        let mut doc = Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
        };
        // open elements, innermost last
        let mut stack: Vec<NodeId> = vec![Self::ROOT];
        let mut elements = 0usize;

        loop {
            let event = reader.read_event().map_err(|e| XmlError::Syntax {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;

            match event {
                Event::Start(start) => {
                    check_depth(&stack)?;
                    let id = doc.open_element(&reader, &start, current(&stack))?;
                    stack.push(id);
                    elements += 1;
                }
                Event::Empty(start) => {
                    check_depth(&stack)?;
                    doc.open_element(&reader, &start, current(&stack))?;
                    elements += 1;
                }
                Event::End(end) => {
                    if stack.len() <= 1 {
                        let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                        return Err(XmlError::UnexpectedClose(name));
                    }
                    stack.pop();
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(|e| XmlError::Syntax {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    })?;
                    doc.push_text(value.into_owned(), current(&stack))?;
                }
                Event::CData(cdata) => {
                    let value = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                    doc.push_text(value, current(&stack))?;
                }
                Event::Eof => break,
                // comments, processing instructions, declarations and DTDs
                _ => {}
            }
        }

        if stack.len() > 1 {
            let open = stack[stack.len() - 1];
            return Err(XmlError::Unclosed(doc.name(open).map_or_else(
                String::new,
                |name| name.local.clone(),
            )));
        }

        if elements == 0 {
            return Err(XmlError::Empty);
        }

        Ok(doc)
    }

    fn open_element(
        &mut self,
        reader: &NsReader<&[u8]>,
        start: &BytesStart<'_>,
        parent: NodeId,
    ) -> Result<NodeId, XmlError> {
        let (resolved, local) = reader.resolve_element(start.name());
        let name = ExpandedName {
            namespace: namespace_of(resolved)?,
            local: String::from_utf8_lossy(local.as_ref()).into_owned(),
        };

        let id = self.push(NodeKind::Element(name), parent);
        self.nodes[parent].children.push(id);

        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Syntax {
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })?;

            let key = attr.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }

            let (resolved, local) = reader.resolve_attribute(attr.key);
            let name = ExpandedName {
                namespace: namespace_of(resolved)?,
                local: String::from_utf8_lossy(local.as_ref()).into_owned(),
            };
            let raw = String::from_utf8_lossy(&attr.value).replace(['\t', '\n', '\r'], " ");
            let value = unescape(&raw)
                .map_err(|e| XmlError::Syntax {
                    position: reader.buffer_position() as u64,
                    message: e.to_string(),
                })?
                .into_owned();

            let attr_id = self.push(NodeKind::Attribute { name, value }, id);
            self.nodes[id].attributes.push(attr_id);
        }

        Ok(id)
    }

    fn push_text(&mut self, value: String, parent: NodeId) -> Result<(), XmlError> {
        if parent == Self::ROOT {
            if value.trim().is_empty() {
                return Ok(());
            }
            return Err(XmlError::TextOutsideElement);
        }

        // adjacent text and CDATA runs form a single text node
        if let Some(&last) = self.nodes[parent].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last].kind {
                existing.push_str(&value);
                return Ok(());
            }
        }

        let id = self.push(NodeKind::Text(value), parent);
        self.nodes[parent].children.push(id);
        Ok(())
    }

    fn push(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Name of an element or attribute node.
    #[must_use]
    pub fn name(&self, id: NodeId) -> Option<&ExpandedName> {
        match &self.nodes[id].kind {
            NodeKind::Element(name) | NodeKind::Attribute { name, .. } => Some(name),
            NodeKind::Root | NodeKind::Text(_) => None,
        }
    }

    /// XPath string value of a node.
    #[must_use]
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id].kind {
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Text(text) => text.clone(),
            NodeKind::Root | NodeKind::Element(_) => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        // children pushed in reverse so they pop in document order
        let mut pending: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(node) = pending.pop() {
            match &self.nodes[node].kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element(_) => pending.extend(self.nodes[node].children.iter().rev()),
                NodeKind::Root | NodeKind::Attribute { .. } => {}
            }
        }
    }
}

fn current(stack: &[NodeId]) -> NodeId {
    stack.last().copied().unwrap_or(Document::ROOT)
}

/// `stack` holds the root plus every open element.
fn check_depth(stack: &[NodeId]) -> Result<(), XmlError> {
    if stack.len() > MAX_DEPTH {
        return Err(XmlError::TooDeep(MAX_DEPTH));
    }
    Ok(())
}

fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    if !input.contains('\r') {
        return Cow::Borrowed(input);
    }
    Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
}

fn namespace_of(resolved: ResolveResult<'_>) -> Result<Option<String>, XmlError> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.as_ref()).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(XmlError::UnknownPrefix(
            String::from_utf8_lossy(&prefix).into_owned(),
        )),
    }
}
