//! Generic labelled tree used as the normalized record representation.
//!
//! Every payload format ends up as an [`Element`] tree: XML nodes are
//! converted one-to-one, JSON values are mapped to elements named after
//! their keys. Trees serialize back to standalone XML documents.

use roxmltree::Node;
use serde_json::Value;

/// Namespace bound to the `xml:` prefix, never declared explicitly.
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// An attribute on an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Local name.
    pub name: String,
    /// Prefix used in the source document, if any.
    pub prefix: Option<String>,
    /// Namespace URI, if any.
    pub namespace: Option<String>,
    /// Attribute value.
    pub value: String,
}

impl Attribute {
    /// Create an attribute without a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            namespace: None,
            value: value.into(),
        }
    }

    /// Name as written in XML (`prefix:name` or `name`).
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A node of the generic tree: name, text, attributes and child elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local name.
    pub name: String,
    /// Prefix used in the source document, if any.
    pub prefix: Option<String>,
    /// Namespace URI, if any.
    pub namespace: Option<String>,
    /// Direct text content, trimmed. `None` when only whitespace.
    pub text: Option<String>,
    /// Attributes in document order.
    pub attributes: Vec<Attribute>,
    /// Child elements in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Create an empty element without a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            namespace: None,
            text: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set the text content.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Name as written in XML (`prefix:name` or `name`).
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Direct text content, or the empty string.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Get an attribute value by namespace URI and local name.
    #[must_use]
    pub fn attribute_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == Some(namespace))
            .map(|a| a.value.as_str())
    }

    /// Whether this element has the given namespace URI and local name.
    #[must_use]
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Find the first child element with the given local name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Append a child element.
    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Append a simple `<name>text</name>` child.
    pub fn append_field(&mut self, name: &str, text: impl Into<String>) {
        self.children.push(Element::new(name).with_text(text));
    }

    /// Convert a parsed XML element (and its subtree) into a tree.
    ///
    /// Comments and processing instructions are dropped; text nodes are
    /// concatenated into [`Element::text`].
    #[must_use]
    pub fn from_xml(node: Node<'_, '_>) -> Self {
        let tag = node.tag_name();
        let namespace = tag.namespace().map(String::from);
        let prefix = tag
            .namespace()
            .and_then(|uri| node.lookup_prefix(uri))
            .map(String::from);

        let attributes = node
            .attributes()
            .map(|attr| {
                let prefix = attr.namespace().and_then(|uri| {
                    if uri == XML_NAMESPACE {
                        Some("xml")
                    } else {
                        node.lookup_prefix(uri)
                    }
                });
                Attribute {
                    name: attr.name().to_string(),
                    prefix: prefix.map(String::from),
                    namespace: attr.namespace().map(String::from),
                    value: attr.value().to_string(),
                }
            })
            .collect();

        let mut text = String::new();
        let mut children = Vec::new();
        for child in node.children() {
            if child.is_element() {
                children.push(Self::from_xml(child));
            } else if child.is_text() {
                text.push_str(child.text().unwrap_or_default());
            }
        }
        let text = text.trim();

        Self {
            name: tag.name().to_string(),
            prefix,
            namespace,
            text: (!text.is_empty()).then(|| text.to_string()),
            attributes,
            children,
        }
    }

    /// Convert a JSON value into a tree rooted at an element called `name`.
    ///
    /// Objects become one child per key, arrays become repeated children
    /// named after their key, scalars become text and `null` an empty element.
    #[must_use]
    pub fn from_json(name: &str, value: &Value) -> Self {
        let mut element = Self::new(sanitize_name(name));
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    push_json_member(&mut element, key, child);
                }
            }
            Value::Array(items) => {
                for item in items {
                    push_json_member(&mut element, name, item);
                }
            }
            Value::String(s) => element.text = non_empty(strip_invalid_xml_chars(s)),
            Value::Number(n) => element.text = Some(n.to_string()),
            Value::Bool(b) => element.text = Some(b.to_string()),
            Value::Null => {}
        }
        element
    }

    /// Serialize the tree as a standalone XML document (no declaration).
    #[must_use]
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        let mut scope: Vec<(Option<String>, Option<String>)> = Vec::new();
        self.write_xml(&mut out, &mut scope);
        out
    }

    fn write_xml(&self, out: &mut String, scope: &mut Vec<(Option<String>, Option<String>)>) {
        let mark = scope.len();
        let mut declarations: Vec<(Option<String>, String)> = Vec::new();

        // Element binding
        match &self.namespace {
            Some(uri) => bind(scope, &mut declarations, self.prefix.clone(), uri),
            None if self.prefix.is_none() => {
                if matches!(lookup(scope, &None), Some(Some(_))) {
                    scope.push((None, None));
                    declarations.push((None, String::new()));
                }
            }
            None => {}
        }

        // Attribute bindings; unprefixed namespaced attributes get a generated prefix
        let mut attribute_names: Vec<String> = Vec::with_capacity(self.attributes.len());
        for (i, attr) in self.attributes.iter().enumerate() {
            match attr.namespace.as_deref() {
                Some(XML_NAMESPACE) => attribute_names.push(format!("xml:{}", attr.name)),
                Some(uri) => {
                    let prefix = attr.prefix.clone().unwrap_or_else(|| format!("ns{i}"));
                    bind(scope, &mut declarations, Some(prefix.clone()), uri);
                    attribute_names.push(format!("{prefix}:{}", attr.name));
                }
                None => attribute_names.push(attr.qualified_name()),
            }
        }

        let qname = self.qualified_name();
        out.push('<');
        out.push_str(&qname);
        for (prefix, uri) in &declarations {
            match prefix {
                Some(p) => out.push_str(&format!(" xmlns:{p}=\"{}\"", escape(uri, true))),
                None => out.push_str(&format!(" xmlns=\"{}\"", escape(uri, true))),
            }
        }
        for (attr, name) in self.attributes.iter().zip(&attribute_names) {
            out.push_str(&format!(" {name}=\"{}\"", escape(&attr.value, true)));
        }

        if self.text.is_none() && self.children.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            if let Some(text) = &self.text {
                out.push_str(&escape(text, false));
            }
            for child in &self.children {
                child.write_xml(out, scope);
            }
            out.push_str("</");
            out.push_str(&qname);
            out.push('>');
        }

        scope.truncate(mark);
    }
}

/// Append a JSON object member (or array item) as child element(s).
fn push_json_member(parent: &mut Element, key: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                push_json_member(parent, key, item);
            }
        }
        other => parent.push_child(Element::from_json(key, other)),
    }
}

/// Find the URI currently bound to `prefix`, if any.
fn lookup<'a>(
    scope: &'a [(Option<String>, Option<String>)],
    prefix: &Option<String>,
) -> Option<&'a Option<String>> {
    scope.iter().rev().find(|(p, _)| p == prefix).map(|(_, uri)| uri)
}

/// Declare `prefix -> uri` unless that binding is already in scope.
fn bind(
    scope: &mut Vec<(Option<String>, Option<String>)>,
    declarations: &mut Vec<(Option<String>, String)>,
    prefix: Option<String>,
    uri: &str,
) {
    if lookup(scope, &prefix).and_then(|u| u.as_deref()) == Some(uri) {
        return;
    }
    scope.push((prefix.clone(), Some(uri.to_string())));
    declarations.push((prefix, uri.to_string()));
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Escape text for XML content or attribute values.
fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether `c` is a legal XML 1.0 character.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Remove characters that are not allowed in XML 1.0 documents.
///
/// # Examples
/// ```
/// use simpleurl_harvester::tree::strip_invalid_xml_chars;
///
/// assert_eq!(strip_invalid_xml_chars("a\u{0}b\u{1F}c"), "abc");
/// ```
pub fn strip_invalid_xml_chars(text: &str) -> String {
    text.chars().filter(|c| is_xml_char(*c)).collect()
}

/// Turn an arbitrary JSON key into a valid, prefix-free XML element name.
///
/// # Examples
/// ```
/// use simpleurl_harvester::tree::sanitize_name;
///
/// assert_eq!(sanitize_name("eo:cloud_cover"), "eo_cloud_cover");
/// assert_eq!(sanitize_name("@type"), "type");
/// assert_eq!(sanitize_name("3d"), "_3d");
/// ```
pub fn sanitize_name(raw: &str) -> String {
    let raw = raw.strip_prefix('@').unwrap_or(raw);
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    if !starts_ok {
        name.insert(0, '_');
    }
    name
}
