use std::fmt;

/// A namespace-qualified tag name. Used as the key for schema nodes and to
/// address elements in a tree, since YANG modules freely reuse local names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tagpath {
    namespace: String,
    tag: String,
}

impl Tagpath {
    pub fn new(namespace: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            tag: tag.into(),
        }
    }

    /// Creates a tagpath without a namespace.
    pub fn local(tag: impl Into<String>) -> Self {
        Self::new(String::new(), tag)
    }

    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns a tagpath with the same namespace and a different tag.
    pub fn sibling(&self, tag: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), tag)
    }

    #[inline]
    pub fn has_namespace(&self) -> bool {
        !self.namespace.is_empty()
    }
}

/// Formats in Clark notation, `{namespace}tag`, or just `tag` without a namespace.
impl fmt::Display for Tagpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.tag)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.tag)
        }
    }
}
