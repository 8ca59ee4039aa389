use thiserror::Error;

use crate::{schema::Registry, Tagpath};

/// Raised when a mutation would make an element both a leaf with a value and a
/// container with children.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralConflict {
    #[error("cannot add child {child} to {parent}: element holds a value")]
    HasValue { parent: Tagpath, child: Tagpath },
    #[error("cannot set a value on {0}: element has children")]
    HasChildren(Tagpath),
}

/// An XML attribute. Attributes without a namespace are the common case
/// (`message-id`, `type`), while NETCONF-specific ones such as `operation`
/// live in the base namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    namespace: Option<String>,
    name: String,
    value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn with_namespace(
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn same_key(&self, namespace: Option<&str>, name: &str) -> bool {
        self.namespace.as_deref() == namespace && self.name == name
    }
}

/// A node in a configuration or data tree.
///
/// Every child is exclusively owned by its parent. An element either carries a
/// scalar value or has children, never both. Removing a child hands ownership
/// of the detached subtree back to the caller.
#[derive(Debug, Clone)]
pub struct Element {
    tagpath: Tagpath,
    value: Option<String>,
    attributes: Vec<Attribute>,
    children: Vec<Element>,
}

impl Element {
    /// Creates an empty element with no value and no children.
    pub fn new(tagpath: Tagpath) -> Self {
        Self {
            tagpath,
            value: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates a leaf element holding `value`.
    pub fn leaf(tagpath: Tagpath, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(tagpath)
        }
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
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    #[inline]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut()
    }

    /// Consumes the element, returning its children.
    pub fn into_children(self) -> Vec<Element> {
        self.children
    }

    #[inline]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Sets the scalar value of this element.
    pub fn set_value(&mut self, value: impl Into<String>) -> Result<(), StructuralConflict> {
        if self.has_children() {
            return Err(StructuralConflict::HasChildren(self.tagpath.clone()));
        }

        self.value = Some(value.into());
        Ok(())
    }

    pub fn take_value(&mut self) -> Option<String> {
        self.value.take()
    }

    /// Appends `child` and returns a reference to it in its new position.
    pub fn add_child(&mut self, child: Element) -> Result<&mut Element, StructuralConflict> {
        if self.value.is_some() {
            return Err(StructuralConflict::HasValue {
                parent: self.tagpath.clone(),
                child: child.tagpath,
            });
        }

        self.children.push(child);
        let last = self.children.len() - 1;
        Ok(&mut self.children[last])
    }

    /// Creates a child in this element's namespace and returns it.
    pub fn create_child(&mut self, tag: impl Into<String>) -> Result<&mut Element, StructuralConflict> {
        let tagpath = self.tagpath.sibling(tag);
        self.add_child(Element::new(tagpath))
    }

    /// Creates a leaf child in this element's namespace and returns it.
    pub fn create_leaf(
        &mut self,
        tag: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<&mut Element, StructuralConflict> {
        let tagpath = self.tagpath.sibling(tag);
        self.add_child(Element::leaf(tagpath, value))
    }

    /// Detaches the first child matching `tagpath`.
    pub fn remove_child(&mut self, tagpath: &Tagpath) -> Option<Element> {
        let index = self.children.iter().position(|c| &c.tagpath == tagpath)?;
        Some(self.children.remove(index))
    }

    /// Detaches all children.
    pub fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
    }

    pub fn find_child(&self, tagpath: &Tagpath) -> Option<&Element> {
        self.children.iter().find(|c| &c.tagpath == tagpath)
    }

    pub fn find_child_mut(&mut self, tagpath: &Tagpath) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| &c.tagpath == tagpath)
    }

    /// Returns all children matching `tagpath`, e.g. every entry of a list.
    pub fn find_children<'a>(&'a self, tagpath: &'a Tagpath) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| &c.tagpath == tagpath)
    }

    /// Descends through `path`, one child per step. Returns `None` on the first
    /// step that has no match.
    pub fn find_path(&self, path: &[Tagpath]) -> Option<&Element> {
        path.iter().try_fold(self, |node, step| node.find_child(step))
    }

    pub fn find_path_mut(&mut self, path: &[Tagpath]) -> Option<&mut Element> {
        path.iter().try_fold(self, |node, step| node.find_child_mut(step))
    }

    /// Sets an attribute without a namespace, replacing an existing one in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.put_attribute(Attribute::new(name, value));
    }

    /// Sets a namespace-qualified attribute, replacing an existing one in place.
    pub fn set_ns_attribute(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.put_attribute(Attribute::with_namespace(namespace, name, value));
    }

    pub fn put_attribute(&mut self, attribute: Attribute) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.same_key(attribute.namespace(), attribute.name()))
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    /// Returns the value of the attribute `name` that has no namespace.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_ns(None, name)
    }

    pub fn attribute_ns(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.same_key(namespace, name))
            .map(Attribute::value)
    }

    pub fn remove_attribute(&mut self, namespace: Option<&str>, name: &str) -> Option<Attribute> {
        let index = self.attributes.iter().position(|a| a.same_key(namespace, name))?;
        Some(self.attributes.remove(index))
    }

    /// Structural equality. Children are compared order-independently, except
    /// entries of lists and leaf-lists that `registry` marks as ordered-by-user.
    pub fn equals(&self, other: &Self, registry: Option<&Registry>) -> bool {
        self.tagpath == other.tagpath
            && self.normalized_value() == other.normalized_value()
            && self.attributes.len() == other.attributes.len()
            && self.attributes.iter().all(|a| other.attributes.contains(a))
            && children_equal(&self.children, &other.children, registry)
    }

    // An empty value and no value serialize identically.
    fn normalized_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, None)
    }
}

impl Eq for Element {}

fn children_equal(a: &[Element], b: &[Element], registry: Option<&Registry>) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut seen: Vec<&Tagpath> = Vec::new();
    for child in a {
        if seen.contains(&&child.tagpath) {
            continue;
        }
        seen.push(&child.tagpath);

        let group_a: Vec<&Element> = a.iter().filter(|c| c.tagpath == child.tagpath).collect();
        let group_b: Vec<&Element> = b.iter().filter(|c| c.tagpath == child.tagpath).collect();
        if group_a.len() != group_b.len() {
            return false;
        }

        let ordered = registry
            .and_then(|r| r.lookup(&child.tagpath))
            .is_some_and(|node| node.is_ordered_by_user());

        let equal = if ordered {
            group_a.iter().zip(&group_b).all(|(x, y)| x.equals(y, registry))
        } else {
            unordered_equal(&group_a, &group_b, registry)
        };

        if !equal {
            return false;
        }
    }

    // Every group of `a` matched in size and the totals are equal, so `b` holds
    // no tagpath that `a` lacks.
    true
}

fn unordered_equal(a: &[&Element], b: &[&Element], registry: Option<&Registry>) -> bool {
    let mut used = vec![false; b.len()];
    a.iter().all(|x| {
        let found = b
            .iter()
            .enumerate()
            .find(|(i, y)| !used[*i] && x.equals(y, registry))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}
