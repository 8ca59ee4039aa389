//! Capability URIs exchanged in `<hello>`.

pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// Advertised by both peers, selects chunked framing.
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
pub const ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
pub const URL: &str = "urn:ietf:params:netconf:capability:url:1.0";
pub const XPATH: &str = "urn:ietf:params:netconf:capability:xpath:1.0";
pub const NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
pub const INTERLEAVE: &str = "urn:ietf:params:netconf:capability:interleave:1.0";

/// An ordered set of capability URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    uris: Vec<String>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capabilities a client advertises by default: both base versions.
    pub fn client_default() -> Self {
        Self::new().with(BASE_1_0).with(BASE_1_1)
    }

    pub fn with(mut self, uri: impl Into<String>) -> Self {
        self.insert(uri);
        self
    }

    /// Adds `uri` unless it is already present.
    pub fn insert(&mut self, uri: impl Into<String>) {
        let uri = uri.into();
        if !self.uris.contains(&uri) {
            self.uris.push(uri);
        }
    }

    /// Whether `uri` is advertised. Parameters after `?` (module capabilities
    /// carry `?module=..&revision=..`) are ignored on both sides.
    pub fn contains(&self, uri: &str) -> bool {
        let base = strip_params(uri);
        self.uris.iter().any(|u| strip_params(u) == base)
    }

    /// Returns true if this set supports chunked framing.
    #[inline]
    pub fn supports_base_1_1(&self) -> bool {
        self.contains(BASE_1_1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut caps = Self::new();
        for uri in iter {
            caps.insert(uri);
        }
        caps
    }
}

fn strip_params(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(base, _)| base)
}
