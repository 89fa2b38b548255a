//! XPath 1.0 subset used to pull attributes out of webservice responses.
//!
//! Supported: absolute, relative and `//` location paths, unions (`|`), the
//! tree axes (`child`, `descendant`, `descendant-or-self`, `self`, `parent`,
//! `attribute`, `ancestor`, `ancestor-or-self`, `following-sibling`,
//! `preceding-sibling`), name tests with namespace prefixes, `*`, `text()`,
//! `node()` and predicates built from positions, relative paths, literals,
//! comparisons, `and` / `or` and the functions `last()`, `position()`,
//! `count()`, `string()`, `string-length()`, `normalize-space()`, `not()`,
//! `contains()`, `starts-with()`, `true()` and `false()`.
//!
//! Functions are only available inside predicates; a top-level expression is
//! always a node-set.
//!
//! Expressions are compiled once; prefixes are resolved against the caller's
//! bindings on every evaluation. An unprefixed name only matches nodes that
//! are in no namespace.

use super::{Document, NodeId, NodeKind};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;

/// Prefix to namespace URI bindings.
pub type Namespaces = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XPathError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string literal at offset {0}")]
    UnterminatedLiteral(usize),
    #[error("unexpected {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("unknown axis '{0}'")]
    UnknownAxis(String),
    #[error("unsupported function '{0}()'")]
    UnsupportedFunction(String),
    #[error("wrong arguments for '{0}()'")]
    InvalidCall(&'static str),
    #[error("namespace prefix '{0}' is not bound")]
    UnboundPrefix(String),
}

/// A compiled path expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    paths: Vec<LocationPath>,
}

impl XPath {
    /// Compile `source`.
    ///
    /// # Errors
    /// Returns `XPathError` when the expression is empty, malformed or uses
    /// an unsupported construct.
    pub fn compile(source: &str) -> Result<Self, XPathError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(XPathError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let mut paths = vec![parser.location_path()?];
        while parser.eat(&Token::Pipe) {
            paths.push(parser.location_path()?);
        }
        parser.finish()?;

        Ok(Self {
            source: source.to_string(),
            paths,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Every namespace prefix referenced by a name test, sorted and unique.
    #[must_use]
    pub fn prefixes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for path in &self.paths {
            path.collect_prefixes(&mut out);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Select nodes from `doc`, in document order without duplicates.
    ///
    /// # Errors
    /// Returns `XPathError::UnboundPrefix` if a prefix has no binding.
    pub fn select(&self, doc: &Document, namespaces: &Namespaces) -> Result<Vec<NodeId>, XPathError> {
        let eval = Evaluator { doc, namespaces };
        let mut nodes = Vec::new();
        for path in &self.paths {
            nodes.extend(eval.path(path, Document::ROOT)?);
        }
        nodes.sort_unstable();
        nodes.dedup();
        Ok(nodes)
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for XPath {
    type Err = XPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

#[derive(Debug, Clone)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

impl LocationPath {
    fn collect_prefixes<'a>(&'a self, out: &mut Vec<&'a str>) {
        for step in &self.steps {
            match &step.test {
                NodeTest::Name {
                    prefix: Some(prefix),
                    ..
                }
                | NodeTest::NamespaceWildcard(prefix) => out.push(prefix),
                _ => {}
            }
            for predicate in &step.predicates {
                predicate.collect_prefixes(out);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfNode,
            "parent" => Self::Parent,
            "attribute" => Self::Attribute,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum NodeTest {
    /// `node()`
    Any,
    /// `text()`
    Text,
    /// `*`
    Wildcard,
    /// `prefix:*`
    NamespaceWildcard(String),
    Name {
        prefix: Option<String>,
        local: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Count,
    String,
    StringLength,
    NormalizeSpace,
    Not,
    Contains,
    StartsWith,
    True,
    False,
}

impl Function {
    /// Name and accepted argument counts.
    fn lookup(name: &str) -> Option<(Self, &'static str, std::ops::RangeInclusive<usize>)> {
        Some(match name {
            "count" => (Self::Count, "count", 1..=1),
            "string" => (Self::String, "string", 0..=1),
            "string-length" => (Self::StringLength, "string-length", 0..=1),
            "normalize-space" => (Self::NormalizeSpace, "normalize-space", 0..=1),
            "not" => (Self::Not, "not", 1..=1),
            "contains" => (Self::Contains, "contains", 2..=2),
            "starts-with" => (Self::StartsWith, "starts-with", 2..=2),
            "true" => (Self::True, "true", 0..=0),
            "false" => (Self::False, "false", 0..=0),
            _ => return None,
        })
    }
}

/// Predicate expression.
#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Path(LocationPath),
    Literal(String),
    Number(f64),
    Position,
    Last,
    Call(Function, Vec<Expr>),
}

impl Expr {
    fn collect_prefixes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Or(a, b) | Self::And(a, b) | Self::Compare(a, _, b) => {
                a.collect_prefixes(out);
                b.collect_prefixes(out);
            }
            Self::Path(path) => path.collect_prefixes(out),
            Self::Call(_, args) => {
                for arg in args {
                    arg.collect_prefixes(out);
                }
            }
            Self::Literal(_) | Self::Number(_) | Self::Position | Self::Last => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Dot,
    DotDot,
    Star,
    Pipe,
    Comma,
    Colon,
    AxisSep,
    Op(CmpOp),
    Name(String),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, XPathError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        let token = match ch {
            c if c.is_whitespace() => continue,
            '/' if next == Some('/') => {
                chars.next();
                Token::DoubleSlash
            }
            '/' => Token::Slash,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '@' => Token::At,
            '*' => Token::Star,
            '|' => Token::Pipe,
            ',' => Token::Comma,
            ':' if next == Some(':') => {
                chars.next();
                Token::AxisSep
            }
            ':' => Token::Colon,
            '=' => Token::Op(CmpOp::Eq),
            '!' if next == Some('=') => {
                chars.next();
                Token::Op(CmpOp::Ne)
            }
            '<' if next == Some('=') => {
                chars.next();
                Token::Op(CmpOp::Le)
            }
            '<' => Token::Op(CmpOp::Lt),
            '>' if next == Some('=') => {
                chars.next();
                Token::Op(CmpOp::Ge)
            }
            '>' => Token::Op(CmpOp::Gt),
            '.' if next == Some('.') => {
                chars.next();
                Token::DotDot
            }
            '.' if !next.is_some_and(|c| c.is_ascii_digit()) => Token::Dot,
            '\'' | '"' => {
                let mut literal = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ch {
                        closed = true;
                        break;
                    }
                    literal.push(c);
                }
                if !closed {
                    return Err(XPathError::UnterminatedLiteral(offset));
                }
                Token::Literal(literal)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut number = String::from(c);
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number
                    .parse::<f64>()
                    .map_err(|_| XPathError::UnexpectedChar { ch: c, offset })?;
                Token::Number(value)
            }
            c if is_name_start(c) => {
                let mut name = String::from(c);
                while let Some(&(_, c)) = chars.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Name(name)
            }
            c => return Err(XPathError::UnexpectedChar { ch: c, offset }),
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> XPathError {
        match self.tokens.get(self.pos) {
            Some(spanned) => XPathError::UnexpectedToken {
                found: format!("{:?}", spanned.token),
                expected,
                offset: spanned.offset,
            },
            None => XPathError::UnexpectedEnd(expected),
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), XPathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn finish(&self) -> Result<(), XPathError> {
        if self.pos < self.tokens.len() {
            Err(self.unexpected("end of expression"))
        } else {
            Ok(())
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Star | Token::At | Token::Dot | Token::DotDot)
        )
    }

    fn location_path(&mut self) -> Result<LocationPath, XPathError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    return Ok(LocationPath {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                true
            }
            _ => false,
        };

        steps.push(self.step()?);
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(descendant_or_self());
                steps.push(self.step()?);
            } else {
                break;
            }
        }

        Ok(LocationPath { absolute, steps })
    }

    fn step(&mut self) -> Result<Step, XPathError> {
        let axis = match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfNode,
                    test: NodeTest::Any,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Any,
                    predicates: Vec::new(),
                });
            }
            Some(Token::At) => {
                self.pos += 1;
                Axis::Attribute
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::AxisSep) => {
                let axis =
                    Axis::from_name(name).ok_or_else(|| XPathError::UnknownAxis(name.clone()))?;
                self.pos += 2;
                axis
            }
            _ => Axis::Child,
        };

        let test = self.node_test()?;

        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.or_expr()?);
            self.expect(&Token::RBracket, "']'")?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn node_test(&mut self) -> Result<NodeTest, XPathError> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Wildcard),
            Some(Token::Name(name)) => {
                if self.eat(&Token::LParen) {
                    self.expect(&Token::RParen, "')'")?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::Any),
                        _ => Err(XPathError::UnsupportedFunction(name)),
                    };
                }
                if self.eat(&Token::Colon) {
                    return match self.advance() {
                        Some(Token::Star) => Ok(NodeTest::NamespaceWildcard(name)),
                        Some(Token::Name(local)) => Ok(NodeTest::Name {
                            prefix: Some(name),
                            local,
                        }),
                        _ => {
                            self.pos -= 1;
                            Err(self.unexpected("local name or '*' after prefix"))
                        }
                    };
                }
                Ok(NodeTest::Name {
                    prefix: None,
                    local: name,
                })
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected("node test"))
            }
            None => Err(XPathError::UnexpectedEnd("node test")),
        }
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == word)
    }

    fn or_expr(&mut self) -> Result<Expr, XPathError> {
        let mut expr = self.and_expr()?;
        while self.keyword("or") {
            self.pos += 1;
            expr = Expr::Or(Box::new(expr), Box::new(self.and_expr()?));
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, XPathError> {
        let mut expr = self.comparison()?;
        while self.keyword("and") {
            self.pos += 1;
            expr = Expr::And(Box::new(expr), Box::new(self.comparison()?));
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> Result<Expr, XPathError> {
        let left = self.primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, XPathError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.or_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::Literal(literal)) => {
                let expr = Expr::Literal(literal.clone());
                self.pos += 1;
                Ok(expr)
            }
            Some(Token::Number(number)) => {
                let expr = Expr::Number(*number);
                self.pos += 1;
                Ok(expr)
            }
            Some(Token::Name(name))
                if self.peek_at(1) == Some(&Token::LParen)
                    && !matches!(name.as_str(), "text" | "node") =>
            {
                let name = name.clone();
                self.pos += 2;
                let args = self.arguments()?;
                call(&name, args)
            }
            Some(Token::Slash | Token::DoubleSlash) => Ok(Expr::Path(self.location_path()?)),
            _ if self.starts_step() => Ok(Expr::Path(self.location_path()?)),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Comma separated arguments up to and including the closing `)`.
    fn arguments(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.or_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "',' or ')'")?;
        Ok(args)
    }
}

fn call(name: &str, args: Vec<Expr>) -> Result<Expr, XPathError> {
    match (name, args.len()) {
        ("last", 0) => return Ok(Expr::Last),
        ("position", 0) => return Ok(Expr::Position),
        ("last", _) => return Err(XPathError::InvalidCall("last")),
        ("position", _) => return Err(XPathError::InvalidCall("position")),
        _ => {}
    }

    let (function, name, arity) =
        Function::lookup(name).ok_or_else(|| XPathError::UnsupportedFunction(name.to_string()))?;
    if !arity.contains(&args.len()) {
        return Err(XPathError::InvalidCall(name));
    }
    if function == Function::Count && !matches!(args.first(), Some(Expr::Path(_))) {
        return Err(XPathError::InvalidCall(name));
    }
    Ok(Expr::Call(function, args))
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Any,
        predicates: Vec::new(),
    }
}

enum Resolved<'a> {
    Any,
    Text,
    Wildcard,
    Namespace(&'a str),
    Name(Option<&'a str>, &'a str),
}

enum Value {
    Nodes(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    /// XPath `string()` conversion; a node-set yields its first node.
    fn into_string(self) -> String {
        match self {
            Self::Nodes(nodes) => nodes.into_iter().next().unwrap_or_default(),
            Self::Str(s) => s,
            Self::Num(n) => format_number(n),
            Self::Bool(b) => b.to_string(),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Nodes(nodes) => !nodes.is_empty(),
            Self::Str(s) => !s.is_empty(),
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Bool(b) => *b,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        whole.to_string()
    } else {
        n.to_string()
    }
}

fn to_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn compare_numbers(a: f64, op: CmpOp, b: f64) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn compare_strings(a: &str, op: CmpOp, b: &str) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        _ => compare_numbers(to_number(a), op, to_number(b)),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            let (a, b) = (left.truthy(), right.truthy());
            match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                _ => compare_numbers(f64::from(u8::from(a)), op, f64::from(u8::from(b))),
            }
        }
        (Value::Nodes(a), Value::Nodes(b)) => a
            .iter()
            .any(|x| b.iter().any(|y| compare_strings(x, op, y))),
        (Value::Nodes(a), Value::Str(s)) => a.iter().any(|x| compare_strings(x, op, s)),
        (Value::Str(s), Value::Nodes(a)) => a.iter().any(|x| compare_strings(s, op, x)),
        (Value::Nodes(a), Value::Num(n)) => a.iter().any(|x| compare_numbers(to_number(x), op, *n)),
        (Value::Num(n), Value::Nodes(a)) => a.iter().any(|x| compare_numbers(*n, op, to_number(x))),
        (Value::Str(a), Value::Str(b)) => compare_strings(a, op, b),
        (Value::Num(a), Value::Str(b)) => compare_numbers(*a, op, to_number(b)),
        (Value::Str(a), Value::Num(b)) => compare_numbers(to_number(a), op, *b),
        (Value::Num(a), Value::Num(b)) => compare_numbers(*a, op, *b),
    }
}

struct Evaluator<'a> {
    doc: &'a Document,
    namespaces: &'a Namespaces,
}

impl<'a> Evaluator<'a> {
    fn path(&self, path: &LocationPath, context: NodeId) -> Result<Vec<NodeId>, XPathError> {
        let mut current = vec![if path.absolute {
            Document::ROOT
        } else {
            context
        }];

        for step in &path.steps {
            let test = self.resolve(&step.test)?;
            let mut next = Vec::new();

            for &node in &current {
                let mut candidates: Vec<NodeId> = self
                    .axis(step.axis, node)
                    .into_iter()
                    .filter(|&candidate| self.matches(step.axis, &test, candidate))
                    .collect();

                for predicate in &step.predicates {
                    let size = candidates.len();
                    let mut kept = Vec::with_capacity(size);
                    for (index, &candidate) in candidates.iter().enumerate() {
                        if self.predicate(predicate, candidate, index + 1, size)? {
                            kept.push(candidate);
                        }
                    }
                    candidates = kept;
                }

                next.extend(candidates);
            }

            next.sort_unstable();
            next.dedup();
            current = next;
        }

        Ok(current)
    }

    fn resolve<'t>(&self, test: &'t NodeTest) -> Result<Resolved<'t>, XPathError>
    where
        'a: 't,
    {
        Ok(match test {
            NodeTest::Any => Resolved::Any,
            NodeTest::Text => Resolved::Text,
            NodeTest::Wildcard => Resolved::Wildcard,
            NodeTest::NamespaceWildcard(prefix) => Resolved::Namespace(self.uri(prefix)?),
            NodeTest::Name { prefix, local } => {
                let namespace = match prefix {
                    Some(prefix) => Some(self.uri(prefix)?),
                    None => None,
                };
                Resolved::Name(namespace, local)
            }
        })
    }

    fn uri(&self, prefix: &str) -> Result<&'a str, XPathError> {
        self.namespaces
            .get(prefix)
            .map(String::as_str)
            .ok_or_else(|| XPathError::UnboundPrefix(prefix.to_string()))
    }

    fn matches(&self, axis: Axis, test: &Resolved<'_>, node: NodeId) -> bool {
        let kind = &self.doc.node(node).kind;
        let principal = match (axis, kind) {
            (Axis::Attribute, NodeKind::Attribute { name, .. }) => Some(name),
            (Axis::Attribute, _) => None,
            (_, NodeKind::Element(name)) => Some(name),
            _ => None,
        };

        match test {
            Resolved::Any => true,
            Resolved::Text => matches!(kind, NodeKind::Text(_)),
            Resolved::Wildcard => principal.is_some(),
            Resolved::Namespace(uri) => {
                principal.is_some_and(|name| name.namespace.as_deref() == Some(*uri))
            }
            Resolved::Name(namespace, local) => principal.is_some_and(|name| {
                name.namespace.as_deref() == *namespace && name.local == *local
            }),
        }
    }

    /// Nodes along `axis` in proximity order.
    fn axis(&self, axis: Axis, node: NodeId) -> Vec<NodeId> {
        let current = self.doc.node(node);
        match axis {
            Axis::Child => current.children.clone(),
            Axis::Attribute => current.attributes.clone(),
            Axis::SelfNode => vec![node],
            Axis::Parent => current.parent.into_iter().collect(),
            Axis::Descendant => {
                let mut out = Vec::new();
                self.descendants(node, &mut out);
                out
            }
            Axis::DescendantOrSelf => {
                let mut out = vec![node];
                self.descendants(node, &mut out);
                out
            }
            Axis::Ancestor => self.ancestors(node),
            Axis::AncestorOrSelf => {
                let mut out = vec![node];
                out.extend(self.ancestors(node));
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                let Some(parent) = current.parent else {
                    return Vec::new();
                };
                let siblings = &self.doc.node(parent).children;
                let Some(index) = siblings.iter().position(|&n| n == node) else {
                    return Vec::new();
                };
                if axis == Axis::FollowingSibling {
                    siblings[index + 1..].to_vec()
                } else {
                    siblings[..index].iter().rev().copied().collect()
                }
            }
        }
    }

    /// Appends the descendants of `node` in document order.
    fn descendants(&self, node: NodeId, out: &mut Vec<NodeId>) {
        let mut pending: Vec<NodeId> = self.doc.node(node).children.iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            out.push(id);
            pending.extend(self.doc.node(id).children.iter().rev());
        }
    }

    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut parent = self.doc.node(node).parent;
        while let Some(id) = parent {
            out.push(id);
            parent = self.doc.node(id).parent;
        }
        out
    }

    fn predicate(
        &self,
        expr: &Expr,
        node: NodeId,
        position: usize,
        size: usize,
    ) -> Result<bool, XPathError> {
        Ok(match self.value(expr, node, position, size)? {
            Value::Num(n) => (n - position as f64).abs() < f64::EPSILON,
            other => other.truthy(),
        })
    }

    fn value(
        &self,
        expr: &Expr,
        node: NodeId,
        position: usize,
        size: usize,
    ) -> Result<Value, XPathError> {
        Ok(match expr {
            Expr::Or(a, b) => Value::Bool(
                self.value(a, node, position, size)?.truthy()
                    || self.value(b, node, position, size)?.truthy(),
            ),
            Expr::And(a, b) => Value::Bool(
                self.value(a, node, position, size)?.truthy()
                    && self.value(b, node, position, size)?.truthy(),
            ),
            Expr::Compare(a, op, b) => {
                let left = self.value(a, node, position, size)?;
                let right = self.value(b, node, position, size)?;
                Value::Bool(compare(&left, *op, &right))
            }
            Expr::Path(path) => Value::Nodes(
                self.path(path, node)?
                    .into_iter()
                    .map(|id| self.doc.string_value(id))
                    .collect(),
            ),
            Expr::Literal(literal) => Value::Str(literal.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Position => Value::Num(position as f64),
            Expr::Last => Value::Num(size as f64),
            Expr::Call(function, args) => self.call(*function, args, node, position, size)?,
        })
    }

    fn call(
        &self,
        function: Function,
        args: &[Expr],
        node: NodeId,
        position: usize,
        size: usize,
    ) -> Result<Value, XPathError> {
        // string argument, defaulting to the context node
        let text = |index: usize| -> Result<String, XPathError> {
            match args.get(index) {
                Some(arg) => Ok(self.value(arg, node, position, size)?.into_string()),
                None => Ok(self.doc.string_value(node)),
            }
        };

        Ok(match function {
            Function::Count => match self.value(&args[0], node, position, size)? {
                Value::Nodes(nodes) => Value::Num(nodes.len() as f64),
                _ => Value::Num(0.0),
            },
            Function::String => Value::Str(text(0)?),
            Function::StringLength => Value::Num(text(0)?.chars().count() as f64),
            Function::NormalizeSpace => {
                let value = text(0)?;
                let words: Vec<&str> = value
                    .split([' ', '\t', '\n', '\r'])
                    .filter(|word| !word.is_empty())
                    .collect();
                Value::Str(words.join(" "))
            }
            Function::Not => Value::Bool(!self.value(&args[0], node, position, size)?.truthy()),
            Function::Contains => Value::Bool(text(0)?.contains(text(1)?.as_str())),
            Function::StartsWith => Value::Bool(text(0)?.starts_with(text(1)?.as_str())),
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SOAP: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <ns1:LoginResponse xmlns:ns1="urn:directory">
      <ns1:status>OK</ns1:status>
      <ns1:user id="42" kind="staff">
        <ns1:cn>Alice Smith</ns1:cn>
        <ns1:mail>alice@example.org</ns1:mail>
        <ns1:group>admins</ns1:group>
        <ns1:group>users</ns1:group>
        <ns1:group>auditors</ns1:group>
      </ns1:user>
      <plain>no namespace</plain>
    </ns1:LoginResponse>
  </soap:Body>
</soap:Envelope>"#;

    fn namespaces() -> Namespaces {
        let mut ns = Namespaces::new();
        ns.insert(
            "soap".to_string(),
            "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
        );
        ns.insert("d".to_string(), "urn:directory".to_string());
        ns
    }

    fn texts(expr: &str) -> Vec<String> {
        let doc = Document::parse(SOAP).unwrap();
        XPath::compile(expr)
            .unwrap()
            .select(&doc, &namespaces())
            .unwrap()
            .into_iter()
            .map(|id| doc.string_value(id).trim().to_string())
            .collect()
    }

    #[test]
    fn test_descendant_with_prefix() {
        assert_eq!(texts("//d:cn"), vec!["Alice Smith"]);
        assert_eq!(texts("//d:group"), vec!["admins", "users", "auditors"]);
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(
            texts("/soap:Envelope/soap:Body/d:LoginResponse/d:status"),
            vec!["OK"]
        );
        assert_eq!(texts("/d:LoginResponse"), Vec::<String>::new());
    }

    #[test]
    fn test_unprefixed_names_match_no_namespace_only() {
        assert_eq!(texts("//cn"), Vec::<String>::new());
        assert_eq!(texts("//plain"), vec!["no namespace"]);
    }

    #[test]
    fn test_attributes() {
        assert_eq!(texts("//d:user/@id"), vec!["42"]);
        assert_eq!(texts("//d:user/attribute::kind"), vec!["staff"]);
        assert_eq!(texts("//d:user/@*"), vec!["42", "staff"]);
    }

    #[test]
    fn test_positional_predicates() {
        assert_eq!(texts("//d:group[1]"), vec!["admins"]);
        assert_eq!(texts("//d:group[last()]"), vec!["auditors"]);
        assert_eq!(texts("//d:group[position() > 1]"), vec!["users", "auditors"]);
        assert_eq!(texts("//d:user/d:group[2]/preceding-sibling::d:group[1]"), vec!["admins"]);
    }

    #[test]
    fn test_comparison_predicates() {
        assert_eq!(texts("//d:user[@id = 42]/d:mail"), vec!["alice@example.org"]);
        assert_eq!(texts("//d:user[@kind = 'guest']/d:mail"), Vec::<String>::new());
        assert_eq!(
            texts("//d:group[. != 'users' and . != 'admins']"),
            vec!["auditors"]
        );
        assert_eq!(
            texts("//d:user[d:cn = 'Alice Smith' or @kind = 'guest']/@id"),
            vec!["42"]
        );
        assert_eq!(texts("//d:LoginResponse[d:status='OK']/plain"), vec!["no namespace"]);
    }

    #[test]
    fn test_wildcards_text_and_union() {
        assert_eq!(texts("//d:user/d:*[1]"), vec!["Alice Smith"]);
        assert_eq!(texts("//d:cn/text()"), vec!["Alice Smith"]);
        assert_eq!(texts("//d:mail | //d:cn"), vec!["Alice Smith", "alice@example.org"]);
        assert_eq!(texts("//d:mail/../@id"), vec!["42"]);
        assert_eq!(
            texts("//d:cn/ancestor::*[2]/d:status"),
            vec!["OK"]
        );
    }

    #[test]
    fn test_function_predicates() {
        assert_eq!(texts("//d:user[count(d:group) = 3]/d:cn"), vec!["Alice Smith"]);
        assert_eq!(texts("//d:user[count(d:group) > 3]/d:cn"), Vec::<String>::new());
        assert_eq!(texts("//d:group[contains(., 'min')]"), vec!["admins"]);
        assert_eq!(
            texts("//d:group[starts-with(., 'a')]"),
            vec!["admins", "auditors"]
        );
        assert_eq!(texts("//d:group[not(. = 'users')]"), vec!["admins", "auditors"]);
        assert_eq!(texts("//d:user[string(@id) = '42']/@kind"), vec!["staff"]);
        assert_eq!(texts("//d:group[string-length() = 5]"), vec!["users"]);
        assert_eq!(
            texts("//d:user[normalize-space(d:cn) = 'Alice Smith']/d:mail"),
            vec!["alice@example.org"]
        );
        assert_eq!(texts("//d:cn[true()]"), vec!["Alice Smith"]);
        assert_eq!(texts("//d:cn[false()]"), Vec::<String>::new());
        assert_eq!(texts("//d:user[count(@*) = 2]/@id"), vec!["42"]);
    }

    #[test]
    fn test_normalize_space_collapses_whitespace() {
        let doc = Document::parse("<a>  one \n\t two  </a><b>x</b>").unwrap();
        let nodes = XPath::compile("//*[normalize-space() = 'one two']")
            .unwrap()
            .select(&doc, &Namespaces::new())
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(doc.name(nodes[0]).map(|n| n.local.as_str()), Some("a"));
    }

    #[test]
    fn test_function_prefixes_are_collected() {
        let xpath = XPath::compile("//a[count(d:b) = 1 and contains(soap:c, 'x')]").unwrap();
        assert_eq!(xpath.prefixes(), vec!["d", "soap"]);
    }

    #[test]
    fn test_descendants_of_deep_document_in_order() {
        let depth = crate::xml::MAX_DEPTH - 1;
        let xml = format!(
            "{}<leaf>first</leaf>{}<leaf>second</leaf>",
            "<n>".repeat(depth),
            "</n>".repeat(depth)
        );
        let doc = Document::parse(&xml).unwrap();
        let nodes = XPath::compile("//leaf")
            .unwrap()
            .select(&doc, &Namespaces::new())
            .unwrap();
        let values: Vec<String> = nodes.iter().map(|&id| doc.string_value(id)).collect();
        assert_eq!(values, vec!["first", "second"]);

        let all = XPath::compile("//n").unwrap().select(&doc, &Namespaces::new()).unwrap();
        assert_eq!(all.len(), depth);
        assert!(all.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_unbound_prefix_fails_at_evaluation() {
        let doc = Document::parse(SOAP).unwrap();
        let xpath = XPath::compile("//x:cn").unwrap();
        assert_eq!(
            xpath.select(&doc, &namespaces()),
            Err(XPathError::UnboundPrefix("x".to_string()))
        );
    }

    #[test]
    fn test_prefixes() {
        let xpath = XPath::compile("//d:user[soap:x = 'y']/d:* | /a").unwrap();
        assert_eq!(xpath.prefixes(), vec!["d", "soap"]);
        assert_eq!(xpath.to_string(), "//d:user[soap:x = 'y']/d:* | /a");
    }

    #[test]
    fn test_compile_errors() {
        assert_eq!(XPath::compile("  ").unwrap_err(), XPathError::Empty);
        assert!(matches!(
            XPath::compile("//a["),
            Err(XPathError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            XPath::compile("//a[@b='c]"),
            Err(XPathError::UnterminatedLiteral(_))
        ));
        assert_eq!(
            XPath::compile("sideways::a").unwrap_err(),
            XPathError::UnknownAxis("sideways".to_string())
        );
        assert_eq!(
            XPath::compile("//a/count()").unwrap_err(),
            XPathError::UnsupportedFunction("count".to_string())
        );
        assert_eq!(
            XPath::compile("//a[frobnicate(.)]").unwrap_err(),
            XPathError::UnsupportedFunction("frobnicate".to_string())
        );
        assert_eq!(
            XPath::compile("//a[count()]").unwrap_err(),
            XPathError::InvalidCall("count")
        );
        assert_eq!(
            XPath::compile("//a[count('x')]").unwrap_err(),
            XPathError::InvalidCall("count")
        );
        assert_eq!(
            XPath::compile("//a[contains(.)]").unwrap_err(),
            XPathError::InvalidCall("contains")
        );
        assert_eq!(
            XPath::compile("//a[last(1)]").unwrap_err(),
            XPathError::InvalidCall("last")
        );
        assert!(XPath::compile("count(//a)").is_err());
        assert!(matches!(
            XPath::compile("//a#"),
            Err(XPathError::UnexpectedChar { ch: '#', .. })
        ));
        assert!(XPath::compile("//a b").is_err());
        assert!(XPath::compile("//").is_err());
    }

    #[test]
    fn test_root_only() {
        let doc = Document::parse("<a>1</a><b>2</b>").unwrap();
        let nodes = XPath::compile("/")
            .unwrap()
            .select(&doc, &Namespaces::new())
            .unwrap();
        assert_eq!(nodes, vec![Document::ROOT]);
        assert_eq!(doc.string_value(nodes[0]), "12");
    }
}
