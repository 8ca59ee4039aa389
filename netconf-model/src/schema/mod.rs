//! YANG-derived schema facts, keyed by [`Tagpath`].
//!
//! A [`Registry`] is built once from one or more descriptor sources and is
//! read-only afterwards, so it can be shared between sessions behind an `Arc`.

use rustc_hash::FxHashMap;

use crate::{Element, Tagpath};

mod loader;
pub use loader::*;

mod validate;
pub use validate::*;

/// The lexical type of a leaf or leaf-list value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Decimal64,
    Boolean,
    /// The allowed enum names. An empty set accepts any name.
    Enumeration(Vec<String>),
    IdentityRef,
    Empty,
    Binary,
    /// A type with no lexical checks (unions, leafrefs, typedefs we don't resolve).
    Other(String),
}

impl ValueType {
    /// Maps a YANG built-in type name to a value type.
    pub fn from_name(name: &str, enums: Vec<String>) -> Self {
        match name {
            "" | "string" => Self::String,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "decimal64" => Self::Decimal64,
            "boolean" => Self::Boolean,
            "enumeration" => Self::Enumeration(enums),
            "identityref" => Self::IdentityRef,
            "empty" => Self::Empty,
            "binary" => Self::Binary,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Decimal64 => "decimal64",
            Self::Boolean => "boolean",
            Self::Enumeration(_) => "enumeration",
            Self::IdentityRef => "identityref",
            Self::Empty => "empty",
            Self::Binary => "binary",
            Self::Other(name) => name,
        }
    }

    /// Returns true if `text` is in the lexical space of this type.
    pub fn is_valid(&self, text: &str) -> bool {
        match self {
            Self::String | Self::Other(_) => true,
            Self::Int8 => text.parse::<i8>().is_ok(),
            Self::Int16 => text.parse::<i16>().is_ok(),
            Self::Int32 => text.parse::<i32>().is_ok(),
            Self::Int64 => text.parse::<i64>().is_ok(),
            Self::UInt8 => text.parse::<u8>().is_ok(),
            Self::UInt16 => text.parse::<u16>().is_ok(),
            Self::UInt32 => text.parse::<u32>().is_ok(),
            Self::UInt64 => text.parse::<u64>().is_ok(),
            Self::Decimal64 => is_decimal(text),
            Self::Boolean => matches!(text, "true" | "false"),
            Self::Enumeration(names) => {
                !text.is_empty() && (names.is_empty() || names.iter().any(|n| n == text))
            }
            Self::IdentityRef => is_qname(text),
            Self::Empty => text.is_empty(),
            Self::Binary => text
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') || c.is_ascii_whitespace()),
        }
    }
}

fn is_decimal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match frac {
        Some(frac) => all_digits(int) && all_digits(frac) && !(int.is_empty() && frac.is_empty()),
        None => !int.is_empty() && all_digits(int),
    }
}

fn is_qname(text: &str) -> bool {
    let name_ok = |s: &str| {
        let mut chars = s.chars();
        chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    match text.split_once(':') {
        Some((prefix, name)) => name_ok(prefix) && name_ok(name),
        None => name_ok(text),
    }
}

/// The type accepting the values of both `a` and `b`.
fn widen(a: &ValueType, b: &ValueType) -> ValueType {
    if a == b {
        a.clone()
    } else {
        ValueType::Other(format!("{}|{}", a.name(), b.name()))
    }
}

/// Node kinds with the data that only makes sense for that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Container {
        presence: bool,
    },
    List {
        keys: Vec<Tagpath>,
        ordered_by_user: bool,
    },
    Leaf {
        value_type: ValueType,
    },
    LeafList {
        value_type: ValueType,
        ordered_by_user: bool,
    },
    /// Schema-only nodes. Their children appear directly under the parent in
    /// instance data.
    Choice,
    Case,
    /// `anyxml` / `anydata`: any content is accepted.
    AnyXml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    pub(crate) tagpath: Tagpath,
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<Tagpath>,
    pub(crate) min_occurs: u32,
    /// `None` means unbounded.
    pub(crate) max_occurs: Option<u32>,
    pub(crate) description: Option<String>,
}

impl SchemaNode {
    pub fn new(tagpath: Tagpath, kind: NodeKind) -> Self {
        Self {
            tagpath,
            kind,
            children: Vec::new(),
            min_occurs: 0,
            max_occurs: None,
            description: None,
        }
    }

    pub fn with_children(mut self, children: Vec<Tagpath>) -> Self {
        self.children = children;
        self
    }

    pub fn with_occurs(mut self, min: u32, max: Option<u32>) -> Self {
        self.min_occurs = min;
        self.max_occurs = max;
        self
    }

    #[inline]
    pub fn tagpath(&self) -> &Tagpath {
        &self.tagpath
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        self.tagpath.namespace()
    }

    #[inline]
    pub fn tag(&self) -> &str {
        self.tagpath.tag()
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn children(&self) -> &[Tagpath] {
        &self.children
    }

    #[inline]
    pub fn min_occurs(&self) -> u32 {
        self.min_occurs
    }

    #[inline]
    pub fn max_occurs(&self) -> Option<u32> {
        self.max_occurs
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The key leaves of a list, empty for every other kind.
    pub fn keys(&self) -> &[Tagpath] {
        match &self.kind {
            NodeKind::List { keys, .. } => keys,
            _ => &[],
        }
    }

    pub fn value_type(&self) -> Option<&ValueType> {
        match &self.kind {
            NodeKind::Leaf { value_type } | NodeKind::LeafList { value_type, .. } => {
                Some(value_type)
            }
            _ => None,
        }
    }

    /// Folds another description of the same tagpath into this one. The
    /// result accepts anything either description accepts.
    fn merge(&mut self, other: Self) {
        for child in other.children {
            if !self.children.contains(&child) {
                self.children.push(child);
            }
        }

        self.min_occurs = self.min_occurs.min(other.min_occurs);
        self.max_occurs = match (self.max_occurs, other.max_occurs) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        if self.description.is_none() {
            self.description = other.description;
        }

        let kind = std::mem::replace(&mut self.kind, NodeKind::AnyXml);
        self.kind = match (kind, other.kind) {
            (a, b) if a == b => a,
            (NodeKind::Container { presence: a }, NodeKind::Container { presence: b }) => {
                NodeKind::Container { presence: a || b }
            }
            (
                NodeKind::List { keys: a, ordered_by_user: oa },
                NodeKind::List { keys: b, ordered_by_user: ob },
            ) => NodeKind::List {
                keys: a.into_iter().filter(|k| b.contains(k)).collect(),
                ordered_by_user: oa && ob,
            },
            (NodeKind::Leaf { value_type: a }, NodeKind::Leaf { value_type: b }) => NodeKind::Leaf {
                value_type: widen(&a, &b),
            },
            (
                NodeKind::LeafList { value_type: a, ordered_by_user: oa },
                NodeKind::LeafList { value_type: b, ordered_by_user: ob },
            ) => NodeKind::LeafList {
                value_type: widen(&a, &b),
                ordered_by_user: oa && ob,
            },
            (a, b) => {
                tracing::debug!(tagpath = %self.tagpath, ?a, ?b, "Conflicting node kinds, accepting any content");
                NodeKind::AnyXml
            }
        };
    }

    /// Whether the relative order of instances of this node is significant.
    pub fn is_ordered_by_user(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::List {
                ordered_by_user: true,
                ..
            } | NodeKind::LeafList {
                ordered_by_user: true,
                ..
            }
        )
    }
}

/// Lookup table from [`Tagpath`] to [`SchemaNode`].
#[derive(Debug, Default, Clone)]
pub struct Registry {
    nodes: FxHashMap<Tagpath, SchemaNode>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Loads every source into a single registry.
    pub fn load<'a>(
        sources: impl IntoIterator<Item = &'a SchemaSource>,
    ) -> Result<Self, SchemaLoadError> {
        let mut builder = Self::builder();
        for source in sources {
            builder.load(source)?;
        }
        Ok(builder.build())
    }

    /// Returns the node registered for `tagpath`. Absence means the element is
    /// unknown to this registry, which callers may or may not tolerate.
    pub fn lookup(&self, tagpath: &Tagpath) -> Option<&SchemaNode> {
        self.nodes.get(tagpath)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SchemaNode> {
        self.nodes.values()
    }

    /// Checks `element` against the registered structure. See [`ValidationError`].
    pub fn validate_structure(&self, element: &Element) -> Result<(), ValidationError> {
        Validator::new(self).validate(element)
    }
}

/// Collects nodes from one or more sources and detects collisions between them.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    nodes: FxHashMap<Tagpath, (String, SchemaNode)>,
}

impl RegistryBuilder {
    /// Parses `source` and registers its nodes.
    pub fn load(&mut self, source: &SchemaSource) -> Result<&mut Self, SchemaLoadError> {
        let nodes = parse_descriptors(source)?;
        tracing::debug!(source = source.name(), nodes = nodes.len(), "Loaded schema source");

        for node in nodes {
            self.insert(source.name(), node)?;
        }

        Ok(self)
    }

    /// Registers a single node on behalf of `origin`.
    ///
    /// A module may use the same local name at several places in its tree
    /// (a `name` key under two lists, say). Nodes from one origin sharing a
    /// tagpath are merged; the same tagpath from two origins is a
    /// [`SchemaLoadError::DuplicateSchemaNode`].
    pub fn insert(&mut self, origin: &str, node: SchemaNode) -> Result<&mut Self, SchemaLoadError> {
        if let Some((first, existing)) = self.nodes.get_mut(&node.tagpath) {
            if first != origin {
                return Err(SchemaLoadError::DuplicateSchemaNode {
                    tagpath: node.tagpath,
                    first: first.clone(),
                    second: origin.to_string(),
                });
            }

            existing.merge(node);
            return Ok(self);
        }

        self.nodes.insert(node.tagpath.clone(), (origin.to_string(), node));
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            nodes: self.nodes.into_iter().map(|(k, (_, node))| (k, node)).collect(),
        }
    }
}
