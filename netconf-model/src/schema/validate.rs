use thiserror::Error;

use super::{NodeKind, Registry, SchemaNode};
use crate::{Element, Tagpath};

/// Limits how deep choice/case nesting is expanded when collecting children.
const MAX_CHOICE_DEPTH: usize = 16;

/// A structural mismatch between a tree and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {issue}")]
pub struct ValidationError {
    /// Slash-separated tag path to the offending element.
    pub path: String,
    pub tagpath: Tagpath,
    pub issue: ValidationIssue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("unexpected child {0}")]
    UnexpectedChild(Tagpath),
    #[error("list entry is missing key {0}")]
    MissingKey(Tagpath),
    #[error("invalid {expected} value `{value}`")]
    InvalidValue { expected: String, value: String },
    #[error("leaf has child elements")]
    LeafWithChildren,
    #[error("container holds a value")]
    ContainerWithValue,
    #[error("{child} occurs {count} times, at most {max} allowed")]
    TooManyOccurrences { child: Tagpath, count: usize, max: u32 },
}

pub(crate) struct Validator<'a> {
    registry: &'a Registry,
    path: Vec<&'a str>,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            path: Vec::new(),
        }
    }

    pub(crate) fn validate(mut self, element: &'a Element) -> Result<(), ValidationError> {
        self.walk(element)
    }

    fn walk(&mut self, element: &'a Element) -> Result<(), ValidationError> {
        self.path.push(element.tag());

        if let Some(node) = self.registry.lookup(element.tagpath()) {
            match node.kind() {
                NodeKind::AnyXml => {
                    self.path.pop();
                    return Ok(());
                }
                NodeKind::Leaf { value_type } | NodeKind::LeafList { value_type, .. } => {
                    if element.has_children() {
                        return Err(self.error(element, ValidationIssue::LeafWithChildren));
                    }
                    let value = element.value().unwrap_or_default();
                    if !value_type.is_valid(value) {
                        return Err(self.error(
                            element,
                            ValidationIssue::InvalidValue {
                                expected: value_type.name().to_string(),
                                value: value.to_string(),
                            },
                        ));
                    }
                }
                NodeKind::Container { .. } | NodeKind::List { .. } | NodeKind::Choice | NodeKind::Case => {
                    self.check_children(element, node)?;
                }
            }
        }

        for child in element.children() {
            self.walk(child)?;
        }

        self.path.pop();
        Ok(())
    }

    fn check_children(&self, element: &'a Element, node: &'a SchemaNode) -> Result<(), ValidationError> {
        if element.value().is_some_and(|v| !v.trim().is_empty()) {
            return Err(self.error(element, ValidationIssue::ContainerWithValue));
        }

        let mut allowed = Vec::new();
        self.collect_children(node, 0, &mut allowed);

        if let Some(unexpected) = element.children().iter().find(|c| !allowed.contains(&c.tagpath())) {
            return Err(self.error(
                element,
                ValidationIssue::UnexpectedChild(unexpected.tagpath().clone()),
            ));
        }

        for key in node.keys() {
            if element.find_child(key).is_none() {
                return Err(self.error(element, ValidationIssue::MissingKey(key.clone())));
            }
        }

        for child in &allowed {
            let Some(child_node) = self.registry.lookup(child) else {
                continue;
            };
            if matches!(child_node.kind(), NodeKind::List { .. } | NodeKind::LeafList { .. }) {
                continue;
            }
            if let Some(max) = child_node.max_occurs() {
                let count = element.find_children(child).count();
                if count > max as usize {
                    return Err(self.error(
                        element,
                        ValidationIssue::TooManyOccurrences {
                            child: (*child).clone(),
                            count,
                            max,
                        },
                    ));
                }
            }
        }

        Ok(())
    }

    /// Collects the tagpaths that may appear as children of `node` in instance
    /// data, looking through choice and case nodes.
    fn collect_children(&self, node: &'a SchemaNode, depth: usize, out: &mut Vec<&'a Tagpath>) {
        for child in node.children() {
            match self.registry.lookup(child) {
                Some(n) if matches!(n.kind(), NodeKind::Choice | NodeKind::Case) => {
                    if depth < MAX_CHOICE_DEPTH {
                        self.collect_children(n, depth + 1, out);
                    }
                }
                _ => out.push(child),
            }
        }
    }

    fn error(&self, element: &Element, issue: ValidationIssue) -> ValidationError {
        ValidationError {
            path: format!("/{}", self.path.join("/")),
            tagpath: element.tagpath().clone(),
            issue,
        }
    }
}
