use std::fmt;

use netconf_model::{Element, Tagpath};

use crate::NS_BASE;

/// The layer an `<rpc-error>` originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rpc => "rpc",
            Self::Protocol => "protocol",
            Self::Application => "application",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "transport" => Self::Transport,
            "rpc" => Self::Rpc,
            "protocol" => Self::Protocol,
            "application" => Self::Application,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// The `<error-tag>` values defined by RFC 6241 appendix A. Unknown tags are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
    Other(String),
}

const ERROR_TAGS: &[(ErrorTag, &str)] = &[
    (ErrorTag::InUse, "in-use"),
    (ErrorTag::InvalidValue, "invalid-value"),
    (ErrorTag::TooBig, "too-big"),
    (ErrorTag::MissingAttribute, "missing-attribute"),
    (ErrorTag::BadAttribute, "bad-attribute"),
    (ErrorTag::UnknownAttribute, "unknown-attribute"),
    (ErrorTag::MissingElement, "missing-element"),
    (ErrorTag::BadElement, "bad-element"),
    (ErrorTag::UnknownElement, "unknown-element"),
    (ErrorTag::UnknownNamespace, "unknown-namespace"),
    (ErrorTag::AccessDenied, "access-denied"),
    (ErrorTag::LockDenied, "lock-denied"),
    (ErrorTag::ResourceDenied, "resource-denied"),
    (ErrorTag::RollbackFailed, "rollback-failed"),
    (ErrorTag::DataExists, "data-exists"),
    (ErrorTag::DataMissing, "data-missing"),
    (ErrorTag::OperationNotSupported, "operation-not-supported"),
    (ErrorTag::OperationFailed, "operation-failed"),
    (ErrorTag::PartialOperation, "partial-operation"),
    (ErrorTag::MalformedMessage, "malformed-message"),
];

impl ErrorTag {
    pub fn as_str(&self) -> &str {
        if let Self::Other(tag) = self {
            return tag;
        }
        ERROR_TAGS
            .iter()
            .find(|(t, _)| t == self)
            .map_or("", |(_, s)| *s)
    }
}

impl From<&str> for ErrorTag {
    fn from(s: &str) -> Self {
        ERROR_TAGS
            .iter()
            .find(|(_, name)| *name == s)
            .map_or_else(|| Self::Other(s.to_string()), |(t, _)| t.clone())
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-reported `<rpc-error>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: ErrorType,
    pub error_tag: ErrorTag,
    pub severity: ErrorSeverity,
    pub app_tag: Option<String>,
    /// The instance path of the offending node, as sent by the server.
    pub path: Option<String>,
    pub message: Option<String>,
    pub info: Option<Element>,
}

impl RpcError {
    pub fn new(error_type: ErrorType, error_tag: ErrorTag) -> Self {
        Self {
            error_type,
            error_tag,
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: None,
        }
    }

    /// Reads an `<rpc-error>` element. Missing or unknown `error-type` and
    /// `error-severity` fall back to `application` and `error`, so a sloppy
    /// server still yields a usable error.
    pub fn from_element(element: &Element) -> Self {
        let field = |tag: &str| {
            element
                .find_child(&Tagpath::new(NS_BASE, tag))
                .and_then(Element::value)
                .map(|v| v.trim().to_string())
        };

        let error_type = field("error-type")
            .as_deref()
            .and_then(ErrorType::parse)
            .unwrap_or(ErrorType::Application);
        let severity = match field("error-severity").as_deref() {
            Some("warning") => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };

        Self {
            error_type,
            error_tag: ErrorTag::from(field("error-tag").unwrap_or_default().as_str()),
            severity,
            app_tag: field("error-app-tag"),
            path: field("error-path"),
            message: field("error-message"),
            info: element.find_child(&Tagpath::new(NS_BASE, "error-info")).cloned(),
        }
    }

    /// Builds the `<rpc-error>` element for this error.
    pub fn to_element(&self) -> Element {
        let tp = |tag: &str| Tagpath::new(NS_BASE, tag);
        let mut children = vec![
            Element::leaf(tp("error-type"), self.error_type.as_str()),
            Element::leaf(tp("error-tag"), self.error_tag.as_str()),
            Element::leaf(tp("error-severity"), self.severity.as_str()),
        ];
        let optional = [
            ("error-app-tag", &self.app_tag),
            ("error-path", &self.path),
            ("error-message", &self.message),
        ];
        for (tag, value) in optional {
            if let Some(value) = value {
                children.push(Element::leaf(tp(tag), value.as_str()));
            }
        }
        children.extend(self.info.clone());

        let mut element = Element::new(tp("rpc-error"));
        for child in children {
            // A fresh element without a value never conflicts.
            let _ = element.add_child(child);
        }
        element
    }

    /// Whether retrying the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.error_tag,
            ErrorTag::InUse | ErrorTag::LockDenied | ErrorTag::ResourceDenied
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.error_type.as_str(), self.severity.as_str(), self.error_tag)?;
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// The errors of a failed reply, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcErrors(pub Vec<RpcError>);

impl RpcErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, RpcError> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&RpcError> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every error is transient.
    pub fn is_transient(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(RpcError::is_transient)
    }
}

impl fmt::Display for RpcErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcErrors {}

impl From<Vec<RpcError>> for RpcErrors {
    fn from(errors: Vec<RpcError>) -> Self {
        Self(errors)
    }
}

impl IntoIterator for RpcErrors {
    type Item = RpcError;
    type IntoIter = std::vec::IntoIter<RpcError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
