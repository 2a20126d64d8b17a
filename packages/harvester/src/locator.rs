//! Locators: small path languages for addressing values inside payloads.
//!
//! - [`JsonLocator`]: a JSON pointer (`/result/results`) or a bare property
//!   name (`features`).
//! - [`XmlLocator`]: a namespace-aware XPath subset evaluated over an
//!   [`Element`] tree.

use std::sync::LazyLock;

use regex::Regex;
use roxmltree::Document;
use serde_json::Value;

use crate::error::{HarvesterError, Result};
use crate::tree::Element;

/// A location inside a JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonLocator {
    /// RFC 6901 pointer, already split into unescaped reference tokens.
    Pointer(Vec<String>),
    /// Direct member of the context object.
    Property(String),
}

impl JsonLocator {
    /// Parse a locator expression.
    ///
    /// Expressions starting with `/` (or the empty string) are JSON pointers,
    /// anything else names a direct property.
    ///
    /// # Examples
    /// ```
    /// use serde_json::json;
    /// use simpleurl_harvester::locator::JsonLocator;
    ///
    /// let value = json!({"result": {"count": 42}});
    /// let locator = JsonLocator::parse("/result/count").unwrap();
    /// assert_eq!(locator.select(&value), Some(&json!(42)));
    /// ```
    pub fn parse(expression: &str) -> Result<Self> {
        if expression.is_empty() {
            return Ok(Self::Pointer(Vec::new()));
        }
        let Some(rest) = expression.strip_prefix('/') else {
            return Ok(Self::Property(expression.to_string()));
        };

        let tokens = rest
            .split('/')
            .map(|token| unescape_token(token, expression))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Pointer(tokens))
    }

    /// Select the value this locator points at.
    #[must_use]
    pub fn select<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        match self {
            Self::Property(name) => value.get(name.as_str()),
            Self::Pointer(tokens) => tokens.iter().try_fold(value, |current, token| match current {
                Value::Object(map) => map.get(token),
                Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }),
        }
    }
}

fn unescape_token(token: &str, expression: &str) -> Result<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => {
                return Err(HarvesterError::InvalidLocator {
                    expression: expression.to_string(),
                    reason: "'~' must be followed by '0' or '1'".to_string(),
                })
            }
        }
    }
    Ok(out)
}

/// Coerce a scalar JSON value to a string. Objects, arrays and `null` yield `None`.
#[must_use]
pub fn json_scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Interpret a JSON value as a non-negative record count.
#[must_use]
pub fn json_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Prefix to namespace URI bindings usable in XML locators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMap {
    bindings: Vec<(String, String)>,
}

impl NamespaceMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every prefixed namespace declared in a document.
    ///
    /// When a prefix is bound more than once, the first binding in document
    /// order wins.
    #[must_use]
    pub fn from_document(doc: &Document<'_>) -> Self {
        let mut map = Self::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            for ns in node.namespaces() {
                if let Some(prefix) = ns.name() {
                    map.insert(prefix, ns.uri());
                }
            }
        }
        map
    }

    /// Bind `prefix` unless it is already bound.
    pub fn insert(&mut self, prefix: &str, uri: &str) {
        if self.resolve(prefix).is_none() {
            self.bindings.push((prefix.to_string(), uri.to_string()));
        }
    }

    /// Look up the namespace URI for a prefix.
    #[must_use]
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

/// A value selected by an [`XmlLocator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected<'a> {
    Element(&'a Element),
    Attribute(&'a str),
    Text(String),
}

impl Selected<'_> {
    /// Coerce the selection to a string, whatever kind of node it is.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            Self::Element(element) => element.text().to_string(),
            Self::Attribute(value) => (*value).to_string(),
            Self::Text(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameTest {
    prefix: Option<String>,
    /// `None` matches any local name.
    local: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    SelfNode,
    Element {
        axis: Axis,
        test: NameTest,
        /// 1-based position among the matching children of each context node.
        position: Option<usize>,
    },
    Attribute {
        axis: Axis,
        test: NameTest,
    },
    Text {
        axis: Axis,
    },
}

/// Step syntax: optional prefix, local name or `*`, optional `[n]`.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static STEP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([A-Za-z_][\w.-]*):)?(\*|[A-Za-z_][\w.-]*)(?:\[([1-9][0-9]*)\])?$")
        .expect("valid regex")
});

/// A namespace-aware XPath subset.
///
/// Supported: absolute (`/a/b`) and relative (`a/b`, `./a`) paths, the
/// descendant shorthand `//`, `*` wildcards, `prefix:name` tests, a
/// positional predicate `[n]` and terminal `@attr` / `text()` steps.
/// Unprefixed names match on local name in any namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlLocator {
    expression: String,
    absolute: bool,
    steps: Vec<Step>,
}

/// Node-set member during evaluation. `Document` is the virtual parent of the root.
#[derive(Clone, Copy)]
enum Context<'a> {
    Document(&'a Element),
    Node(&'a Element),
}

impl XmlLocator {
    /// Parse a locator expression.
    ///
    /// # Examples
    /// ```
    /// use simpleurl_harvester::locator::XmlLocator;
    ///
    /// assert!(XmlLocator::parse("//gmd:MD_Metadata").is_ok());
    /// assert!(XmlLocator::parse("a/@id/b").is_err());
    /// ```
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: &str| HarvesterError::InvalidLocator {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty expression"));
        }
        let (absolute, rest) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let mut steps = Vec::new();
        let mut descendant = false;
        if !rest.is_empty() {
            for segment in rest.split('/') {
                if segment.is_empty() {
                    if descendant {
                        return Err(invalid("unexpected '///'"));
                    }
                    descendant = true;
                    continue;
                }
                if matches!(steps.last(), Some(Step::Attribute { .. } | Step::Text { .. })) {
                    return Err(invalid("attribute and text() steps must come last"));
                }
                let axis = if descendant { Axis::Descendant } else { Axis::Child };
                steps.push(parse_step(segment, axis).ok_or_else(|| invalid("unsupported step"))?);
                descendant = false;
            }
            if descendant {
                return Err(invalid("trailing '/'"));
            }
        }

        Ok(Self {
            expression: expression.to_string(),
            absolute,
            steps,
        })
    }

    /// The original expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate against `context`, resolving prefixes through `namespaces`.
    ///
    /// For absolute paths `context` must be the document's root element.
    pub fn select<'a>(
        &self,
        context: &'a Element,
        namespaces: &NamespaceMap,
    ) -> Result<Vec<Selected<'a>>> {
        let mut current: Vec<Context<'a>> = if self.absolute {
            vec![Context::Document(context)]
        } else {
            vec![Context::Node(context)]
        };

        for step in &self.steps {
            match step {
                Step::SelfNode => {}
                Step::Element {
                    axis,
                    test,
                    position,
                } => {
                    let uri = self.resolve_test(test, namespaces)?;
                    let mut next: Vec<&'a Element> = Vec::new();
                    for ctx in expand(&current, *axis) {
                        let matching = children(ctx).filter(|e| matches(e, test, uri));
                        match position {
                            Some(n) => next.extend(matching.skip(n - 1).take(1)),
                            None => next.extend(matching),
                        }
                    }
                    dedup(&mut next);
                    current = next.into_iter().map(Context::Node).collect();
                }
                Step::Attribute { axis, test } => {
                    let uri = self.resolve_test(test, namespaces)?;
                    let selected = expand(&current, *axis)
                        .into_iter()
                        .filter_map(as_element)
                        .flat_map(|e| e.attributes.iter())
                        .filter(|a| {
                            test.local.as_ref().map_or(true, |l| *l == a.name)
                                && uri.map_or(true, |u| a.namespace.as_deref() == Some(u))
                        })
                        .map(|a| Selected::Attribute(a.value.as_str()))
                        .collect();
                    return Ok(selected);
                }
                Step::Text { axis } => {
                    let selected = expand(&current, *axis)
                        .into_iter()
                        .filter_map(as_element)
                        .filter_map(|e| e.text.clone())
                        .map(Selected::Text)
                        .collect();
                    return Ok(selected);
                }
            }
        }

        Ok(current
            .into_iter()
            .map(|ctx| match ctx {
                Context::Document(root) | Context::Node(root) => Selected::Element(root),
            })
            .collect())
    }

    /// Select the selected elements only.
    pub fn select_elements<'a>(
        &self,
        context: &'a Element,
        namespaces: &NamespaceMap,
    ) -> Result<Vec<&'a Element>> {
        Ok(self
            .select(context, namespaces)?
            .into_iter()
            .filter_map(|s| match s {
                Selected::Element(e) => Some(e),
                _ => None,
            })
            .collect())
    }

    /// Select the first match and coerce it to a trimmed string.
    ///
    /// Returns `None` when nothing matches or the value is empty.
    pub fn select_string(&self, context: &Element, namespaces: &NamespaceMap) -> Result<Option<String>> {
        Ok(self
            .select(context, namespaces)?
            .first()
            .map(|s| s.as_string().trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn resolve_test<'n>(&self, test: &NameTest, namespaces: &'n NamespaceMap) -> Result<Option<&'n str>> {
        match &test.prefix {
            None => Ok(None),
            Some(prefix) => namespaces.resolve(prefix).map(Some).ok_or_else(|| {
                HarvesterError::InvalidLocator {
                    expression: self.expression.clone(),
                    reason: format!("unbound namespace prefix '{prefix}'"),
                }
            }),
        }
    }
}

fn parse_step(segment: &str, axis: Axis) -> Option<Step> {
    match segment {
        "." => return (axis == Axis::Child).then_some(Step::SelfNode),
        "text()" => return Some(Step::Text { axis }),
        _ => {}
    }

    if let Some(attr) = segment.strip_prefix('@') {
        let caps = STEP_PATTERN.captures(attr)?;
        if caps.get(3).is_some() {
            return None;
        }
        return Some(Step::Attribute {
            axis,
            test: name_test(caps.get(1).map(|m| m.as_str()), &caps[2]),
        });
    }

    let caps = STEP_PATTERN.captures(segment)?;
    Some(Step::Element {
        axis,
        test: name_test(caps.get(1).map(|m| m.as_str()), &caps[2]),
        position: caps.get(3).and_then(|m| m.as_str().parse().ok()),
    })
}

fn name_test(prefix: Option<&str>, local: &str) -> NameTest {
    NameTest {
        prefix: prefix.map(String::from),
        local: (local != "*").then(|| local.to_string()),
    }
}

fn matches(element: &Element, test: &NameTest, uri: Option<&str>) -> bool {
    test.local.as_ref().map_or(true, |l| *l == element.name)
        && uri.map_or(true, |u| element.namespace.as_deref() == Some(u))
}

fn children<'a>(ctx: Context<'a>) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
    match ctx {
        Context::Document(root) => Box::new(std::iter::once(root)),
        Context::Node(element) => Box::new(element.children.iter()),
    }
}

fn as_element(ctx: Context<'_>) -> Option<&Element> {
    match ctx {
        Context::Document(_) => None,
        Context::Node(element) => Some(element),
    }
}

/// Apply the axis: `Child` keeps the node-set, `Descendant` widens it to
/// descendant-or-self so a following child step reaches every depth.
fn expand<'a>(current: &[Context<'a>], axis: Axis) -> Vec<Context<'a>> {
    match axis {
        Axis::Child => current.to_vec(),
        Axis::Descendant => {
            let mut out = Vec::new();
            for ctx in current {
                out.push(*ctx);
                let start = match ctx {
                    Context::Document(root) => {
                        out.push(Context::Node(root));
                        *root
                    }
                    Context::Node(element) => element,
                };
                collect_descendants(start, &mut out);
            }
            out
        }
    }
}

fn collect_descendants<'a>(element: &'a Element, out: &mut Vec<Context<'a>>) {
    for child in &element.children {
        out.push(Context::Node(child));
        collect_descendants(child, out);
    }
}

fn dedup(nodes: &mut Vec<&Element>) {
    let mut seen: Vec<*const Element> = Vec::with_capacity(nodes.len());
    nodes.retain(|n| {
        let ptr = *n as *const Element;
        if seen.contains(&ptr) {
            false
        } else {
            seen.push(ptr);
            true
        }
    });
}
