//! XML serialization and parsing for [`Element`] trees.
//!
//! Element namespaces are written as default-namespace declarations, emitted
//! only where an element's namespace differs from the one in scope. Namespaced
//! attributes get a prefix bound on the element that first needs it.

use std::fmt::Write as _;

use thiserror::Error;

use crate::{Attribute, Element, Tagpath};

/// Prefixes used for well-known attribute namespaces. Anything else gets a
/// generated `nsN` prefix.
const KNOWN_PREFIXES: &[(&str, &str)] = &[
    ("urn:ietf:params:xml:ns:netconf:base:1.0", "nc"),
    ("urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults", "wd"),
    ("urn:ietf:params:xml:ns:yang:1", "yang"),
];

/// Bound to `xml` in every document. It must not be declared.
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    MalformedXml(String),
    #[error("unbound namespace prefix `{prefix}` at {position}")]
    UnboundNamespacePrefix { prefix: String, position: String },
    #[error("element {0} mixes text content and child elements")]
    MixedContent(Tagpath),
}

impl From<roxmltree::Error> for XmlError {
    fn from(e: roxmltree::Error) -> Self {
        match e {
            roxmltree::Error::UnknownNamespace(prefix, pos) => Self::UnboundNamespacePrefix {
                prefix,
                position: pos.to_string(),
            },
            other => Self::MalformedXml(other.to_string()),
        }
    }
}

impl Element {
    /// Serializes the tree without an XML declaration or pretty-printing.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        let mut bindings = Vec::new();
        write_element(self, "", &mut bindings, &mut out);
        out
    }

    /// Parses a complete XML document into a tree rooted at its document element.
    pub fn parse_xml(input: &[u8]) -> Result<Self, XmlError> {
        let text =
            std::str::from_utf8(input).map_err(|e| XmlError::MalformedXml(e.to_string()))?;
        Self::parse_str(text)
    }

    pub fn parse_str(text: &str) -> Result<Self, XmlError> {
        let doc = roxmltree::Document::parse(text)?;
        from_node(doc.root_element())
    }
}

/// A prefix binding for attribute namespaces, in scope for a subtree.
struct Binding {
    prefix: String,
    namespace: String,
}

fn write_element(e: &Element, default_ns: &str, bindings: &mut Vec<Binding>, out: &mut String) {
    let scope = bindings.len();

    out.push('<');
    out.push_str(e.tag());

    let ns = e.namespace();
    if ns != default_ns {
        out.push_str(" xmlns=\"");
        escape_into(ns, true, out);
        out.push('"');
    }

    // Bind prefixes first so the attributes below keep their insertion order.
    let mut prefixes = Vec::with_capacity(e.attributes().len());
    for attr in e.attributes() {
        let prefix = match attr.namespace().filter(|ns| !ns.is_empty()) {
            Some(ns) => Some(bind_prefix(ns, bindings, out)),
            None => None,
        };
        prefixes.push(prefix);
    }

    for (attr, prefix) in e.attributes().iter().zip(prefixes) {
        write_attribute(attr, prefix.as_deref(), out);
    }

    let value = e.value().unwrap_or_default();
    if !e.has_children() && value.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        escape_into(value, false, out);
        for child in e.children() {
            write_element(child, ns, bindings, out);
        }
        out.push_str("</");
        out.push_str(e.tag());
        out.push('>');
    }

    bindings.truncate(scope);
}

/// Returns the prefix bound to `ns`, declaring a new binding on the current
/// element if none is in scope.
fn bind_prefix(ns: &str, bindings: &mut Vec<Binding>, out: &mut String) -> String {
    if ns == XML_NAMESPACE {
        return "xml".to_string();
    }
    if let Some(b) = bindings.iter().rev().find(|b| b.namespace == ns) {
        return b.prefix.clone();
    }

    let taken = |p: &str| bindings.iter().any(|b| b.prefix == p);
    let prefix = match KNOWN_PREFIXES.iter().find(|(uri, _)| *uri == ns) {
        Some((_, p)) if !taken(p) => (*p).to_string(),
        _ => {
            let mut n = bindings.len();
            while taken(&format!("ns{n}")) {
                n += 1;
            }
            format!("ns{n}")
        }
    };

    let _ = write!(out, " xmlns:{prefix}=\"");
    escape_into(ns, true, out);
    out.push('"');

    bindings.push(Binding {
        prefix: prefix.clone(),
        namespace: ns.to_string(),
    });
    prefix
}

fn write_attribute(attr: &Attribute, prefix: Option<&str>, out: &mut String) {
    out.push(' ');
    if let Some(prefix) = prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(attr.name());
    out.push_str("=\"");
    escape_into(attr.value(), true, out);
    out.push('"');
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            '\t' if attribute => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
}

fn from_node(node: roxmltree::Node<'_, '_>) -> Result<Element, XmlError> {
    let name = node.tag_name();
    let mut element = Element::new(Tagpath::new(name.namespace().unwrap_or_default(), name.name()));

    for attr in node.attributes() {
        let attribute = match attr.namespace() {
            Some(ns) => Attribute::with_namespace(ns, attr.name(), attr.value()),
            None => Attribute::new(attr.name(), attr.value()),
        };
        element.put_attribute(attribute);
    }

    let mut text = String::new();
    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(from_node(child)?);
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }

    if children.is_empty() {
        if !text.is_empty() {
            // Cannot fail: the element has no children yet.
            let _ = element.set_value(text);
        }
    } else {
        if !text.trim().is_empty() {
            return Err(XmlError::MixedContent(element.tagpath().clone()));
        }
        for child in children {
            let _ = element.add_child(child);
        }
    }

    Ok(element)
}
