use std::path::Path;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::{NodeKind, SchemaNode, ValueType};
use crate::Tagpath;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaLoadError {
    #[error("failed to read schema source {origin}: {reason}")]
    Io { origin: String, reason: String },
    #[error("malformed schema source {origin}: {reason}")]
    Malformed { origin: String, reason: String },
    #[error("schema source {origin} uses prefix `{prefix}` without an import (in {tagpath})")]
    UnresolvedImport {
        origin: String,
        prefix: String,
        tagpath: String,
    },
    #[error("{tagpath} is registered by both {first} and {second}")]
    DuplicateSchemaNode {
        tagpath: Tagpath,
        first: String,
        second: String,
    },
}

/// A named schema descriptor document.
///
/// The format is the one produced by the pyang schema generator: a `<schema>`
/// root holding optional `<import prefix=".." namespace=".."/>` declarations
/// and one `<node>` per data node.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    name: String,
    content: String,
}

impl SchemaSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Reads a descriptor file. The source is named after the path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaLoadError::Io {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(path.display().to_string(), content))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Parses every `<node>` of a descriptor document.
pub(crate) fn parse_descriptors(source: &SchemaSource) -> Result<Vec<SchemaNode>, SchemaLoadError> {
    let malformed = |reason: String| SchemaLoadError::Malformed {
        origin: source.name().to_string(),
        reason,
    };

    let doc = roxmltree::Document::parse(source.content()).map_err(|e| malformed(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "schema" {
        return Err(malformed(format!(
            "expected <schema> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let mut imports = FxHashMap::default();
    for import in root.children().filter(|n| n.has_tag_name("import")) {
        let (Some(prefix), Some(namespace)) = (import.attribute("prefix"), import.attribute("namespace"))
        else {
            return Err(malformed("<import> requires prefix and namespace".to_string()));
        };
        imports.insert(prefix.to_string(), namespace.to_string());
    }

    let mut nodes = Vec::new();
    for node in root.children().filter(|n| n.has_tag_name("node")) {
        let fields = Fields::collect(node);
        if let Some(schema_node) = fields.into_node(source.name(), &imports)? {
            nodes.push(schema_node);
        }
    }

    Ok(nodes)
}

/// The text content of a `<node>`'s fields.
struct Fields<'a> {
    values: FxHashMap<&'a str, &'a str>,
}

impl<'a> Fields<'a> {
    fn collect(node: roxmltree::Node<'a, '_>) -> Self {
        let values = node
            .children()
            .filter(|c| c.is_element())
            .map(|c| (c.tag_name().name(), c.text().unwrap_or_default().trim()))
            .collect();
        Self { values }
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.values.get(name).copied().filter(|v| !v.is_empty())
    }

    fn tokens(&self, name: &str) -> impl Iterator<Item = &'a str> {
        self.get(name).unwrap_or_default().split_whitespace()
    }

    /// Builds the schema node. Returns `None` for the module root (`/`), which
    /// has no tag and cannot appear in instance data.
    fn into_node(
        self,
        origin: &str,
        imports: &FxHashMap<String, String>,
    ) -> Result<Option<SchemaNode>, SchemaLoadError> {
        let malformed = |reason: String| SchemaLoadError::Malformed {
            origin: origin.to_string(),
            reason,
        };

        let path = self
            .get("tagpath")
            .ok_or_else(|| malformed("<node> without <tagpath>".to_string()))?;
        let Some(tag) = path.split('/').filter(|s| !s.is_empty()).last() else {
            return Ok(None);
        };

        let namespace = self
            .get("namespace")
            .ok_or_else(|| malformed(format!("{path} has no <namespace>")))?;
        let tagpath = Tagpath::new(namespace, tag);

        let resolve = |token: &str| -> Result<Tagpath, SchemaLoadError> {
            match token.split_once(':') {
                Some((prefix, local)) => imports
                    .get(prefix)
                    .map(|ns| Tagpath::new(ns.clone(), local))
                    .ok_or_else(|| SchemaLoadError::UnresolvedImport {
                        origin: origin.to_string(),
                        prefix: prefix.to_string(),
                        tagpath: path.to_string(),
                    }),
                None => Ok(Tagpath::new(namespace, token)),
            }
        };

        let children = self.tokens("children").map(resolve).collect::<Result<Vec<_>, _>>()?;
        let keys = self.tokens("keys").map(resolve).collect::<Result<Vec<_>, _>>()?;
        if let Some(missing) = keys.iter().find(|k| !children.contains(k)) {
            return Err(malformed(format!("{path}: key {missing} is not a child")));
        }

        let ordered_by_user = match self.get("ordered_by") {
            None | Some("system") => false,
            Some("user") => true,
            Some(other) => return Err(malformed(format!("{path}: bad ordered_by `{other}`"))),
        };
        let value_type = || {
            ValueType::from_name(
                self.get("primitive_type").unwrap_or_default(),
                self.tokens("enums").map(str::to_string).collect(),
            )
        };

        let kind = match self.get("kind") {
            Some("container") => NodeKind::Container {
                presence: self.get("presence") == Some("true"),
            },
            Some("list") => NodeKind::List {
                keys,
                ordered_by_user,
            },
            Some("leaf") => NodeKind::Leaf {
                value_type: value_type(),
            },
            Some("leaf-list") => NodeKind::LeafList {
                value_type: value_type(),
                ordered_by_user,
            },
            Some("choice") => NodeKind::Choice,
            Some("case") => NodeKind::Case,
            Some("anyxml" | "anydata") => NodeKind::AnyXml,
            Some(other) => return Err(malformed(format!("{path}: unknown kind `{other}`"))),
            // Older descriptors carry no kind.
            None if !keys.is_empty() => NodeKind::List {
                keys,
                ordered_by_user,
            },
            None if !children.is_empty() => NodeKind::Container { presence: false },
            None => NodeKind::Leaf {
                value_type: value_type(),
            },
        };

        let min_occurs = match self.get("min_occurs") {
            Some(v) => v
                .parse()
                .map_err(|_| malformed(format!("{path}: bad min_occurs `{v}`")))?,
            None => 0,
        };
        let max_occurs = match self.get("max_occurs") {
            None | Some("-1") => None,
            Some(v) => Some(
                v.parse()
                    .map_err(|_| malformed(format!("{path}: bad max_occurs `{v}`")))?,
            ),
        };

        let mut node = SchemaNode::new(tagpath, kind)
            .with_children(children)
            .with_occurs(min_occurs, max_occurs);
        node.description = self.get("desc").map(str::to_string);

        Ok(Some(node))
    }
}
