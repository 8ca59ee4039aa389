//! Typed NETCONF operations and their `<rpc>` bodies.
//!
//! Every conversion here is total: argument errors are the server's to report
//! in its `<rpc-reply>`.

use netconf_model::{Element, Tagpath};
use netconf_wire::{NS_BASE, NS_NOTIFICATION};

fn base(tag: &str) -> Tagpath {
    Tagpath::new(NS_BASE, tag)
}

/// Appends `child` to `parent`. Operation bodies are built top-down from
/// fresh elements that never hold a value, so this cannot conflict.
fn push(parent: &mut Element, child: Element) {
    let _ = parent.add_child(child);
}

/// A configuration datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
    /// A datastore reachable by URL (`:url` capability).
    Url(String),
}

impl Datastore {
    /// Builds `<wrapper><running/></wrapper>` and the like.
    fn to_element(&self, wrapper: &str) -> Element {
        let mut outer = Element::new(base(wrapper));
        push(&mut outer, self.to_inner());
        outer
    }

    fn to_inner(&self) -> Element {
        match self {
            Self::Running => Element::new(base("running")),
            Self::Candidate => Element::new(base("candidate")),
            Self::Startup => Element::new(base("startup")),
            Self::Url(url) => Element::leaf(base("url"), url.as_str()),
        }
    }
}

/// The source of `<copy-config>` and `<validate>`: a datastore or an inline
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Datastore(Datastore),
    /// Inline configuration. Wrapped in `<config>` unless it already is one.
    Config(Element),
}

impl ConfigSource {
    fn to_element(&self) -> Element {
        match self {
            Self::Datastore(ds) => ds.to_element("source"),
            Self::Config(config) => {
                let mut source = Element::new(base("source"));
                push(&mut source, wrap_config(config.clone()));
                source
            }
        }
    }
}

impl From<Datastore> for ConfigSource {
    fn from(ds: Datastore) -> Self {
        Self::Datastore(ds)
    }
}

/// Wraps `content` in a base `<config>` element, unless it is one already.
pub fn wrap_config(content: Element) -> Element {
    if content.tagpath() == &base("config") {
        return content;
    }
    let mut config = Element::new(base("config"));
    push(&mut config, content);
    config
}

/// A filter restricting the data a `<get>`, `<get-config>` or subscription
/// returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// RFC 6241 subtree filtering.
    Subtree(Element),
    /// An XPath 1.0 expression (`:xpath` capability). `namespaces` binds the
    /// prefixes used in `select`.
    XPath {
        select: String,
        namespaces: Vec<(String, String)>,
    },
}

impl Filter {
    pub fn subtree(element: Element) -> Self {
        Self::Subtree(element)
    }

    pub fn xpath(select: impl Into<String>) -> Self {
        Self::XPath {
            select: select.into(),
            namespaces: Vec::new(),
        }
    }

    /// Binds `prefix` for an XPath filter. No-op on subtree filters.
    pub fn with_namespace(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        if let Self::XPath { namespaces, .. } = &mut self {
            namespaces.push((prefix.into(), namespace.into()));
        }
        self
    }

    fn to_element(&self, namespace: &str) -> Element {
        let mut filter = Element::new(Tagpath::new(namespace, "filter"));
        match self {
            Self::Subtree(content) => {
                filter.set_attribute("type", "subtree");
                push(&mut filter, content.clone());
            }
            Self::XPath { select, namespaces } => {
                filter.set_attribute("type", "xpath");
                for (prefix, uri) in namespaces {
                    filter.set_attribute(format!("xmlns:{prefix}"), uri.as_str());
                }
                filter.set_attribute("select", select.as_str());
            }
        }
        filter
    }
}

/// The `<default-operation>` of an `<edit-config>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOperation {
    Merge,
    Replace,
    None,
}

impl DefaultOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::None => "none",
        }
    }
}

/// The `<test-option>` of an `<edit-config>` (`:validate` capability).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOption {
    TestThenSet,
    Set,
    TestOnly,
}

impl TestOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestThenSet => "test-then-set",
            Self::Set => "set",
            Self::TestOnly => "test-only",
        }
    }
}

/// The `<error-option>` of an `<edit-config>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOption {
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

impl ErrorOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopOnError => "stop-on-error",
            Self::ContinueOnError => "continue-on-error",
            Self::RollbackOnError => "rollback-on-error",
        }
    }
}

/// An `<edit-config>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditConfig {
    pub target: Datastore,
    /// The configuration content, wrapped in `<config>` unless it is one.
    pub config: Element,
    pub default_operation: Option<DefaultOperation>,
    pub test_option: Option<TestOption>,
    pub error_option: Option<ErrorOption>,
}

impl EditConfig {
    pub fn new(target: Datastore, config: Element) -> Self {
        Self {
            target,
            config,
            default_operation: None,
            test_option: None,
            error_option: None,
        }
    }

    pub fn with_default_operation(mut self, op: DefaultOperation) -> Self {
        self.default_operation = Some(op);
        self
    }

    pub fn with_test_option(mut self, option: TestOption) -> Self {
        self.test_option = Some(option);
        self
    }

    pub fn with_error_option(mut self, option: ErrorOption) -> Self {
        self.error_option = Some(option);
        self
    }
}

/// The arguments of a `<commit>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    /// Makes this a confirmed commit (`:confirmed-commit` capability).
    pub confirmed: bool,
    /// The confirm timeout in seconds. The server defaults to 600.
    pub confirm_timeout: Option<u32>,
    /// Makes a confirmed commit survive the session, under this id.
    pub persist: Option<String>,
    /// Confirms a persistent confirmed commit.
    pub persist_id: Option<String>,
}

impl Commit {
    /// A confirmed commit rolled back after `timeout` seconds unless confirmed.
    pub fn confirmed(timeout: Option<u32>) -> Self {
        Self {
            confirmed: true,
            confirm_timeout: timeout,
            ..Self::default()
        }
    }
}

/// An RFC 5277 `<create-subscription>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    /// The event stream. The server defaults to `NETCONF`.
    pub stream: Option<String>,
    pub filter: Option<Filter>,
    /// RFC 3339 date-time to replay from.
    pub start_time: Option<String>,
    pub stop_time: Option<String>,
}

/// A NETCONF operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get {
        filter: Option<Filter>,
    },
    GetConfig {
        source: Datastore,
        filter: Option<Filter>,
    },
    EditConfig(EditConfig),
    CopyConfig {
        target: Datastore,
        source: ConfigSource,
    },
    DeleteConfig {
        target: Datastore,
    },
    Lock {
        target: Datastore,
    },
    Unlock {
        target: Datastore,
    },
    Validate {
        source: ConfigSource,
    },
    Commit(Commit),
    CancelCommit {
        persist_id: Option<String>,
    },
    DiscardChanges,
    CloseSession,
    KillSession {
        session_id: u32,
    },
    CreateSubscription(Subscription),
    /// Any other RPC; the element is sent as the `<rpc>` body.
    Custom(Element),
}

impl Operation {
    /// The name of the operation element.
    pub fn name(&self) -> &str {
        match self {
            Self::Get { .. } => "get",
            Self::GetConfig { .. } => "get-config",
            Self::EditConfig(_) => "edit-config",
            Self::CopyConfig { .. } => "copy-config",
            Self::DeleteConfig { .. } => "delete-config",
            Self::Lock { .. } => "lock",
            Self::Unlock { .. } => "unlock",
            Self::Validate { .. } => "validate",
            Self::Commit(_) => "commit",
            Self::CancelCommit { .. } => "cancel-commit",
            Self::DiscardChanges => "discard-changes",
            Self::CloseSession => "close-session",
            Self::KillSession { .. } => "kill-session",
            Self::CreateSubscription(_) => "create-subscription",
            Self::Custom(element) => element.tag(),
        }
    }

    /// Builds the operation element carried in the `<rpc>`.
    pub fn to_element(&self) -> Element {
        if let Self::Custom(element) = self {
            return element.clone();
        }

        let namespace = match self {
            Self::CreateSubscription(_) => NS_NOTIFICATION,
            _ => NS_BASE,
        };
        let mut op = Element::new(Tagpath::new(namespace, self.name()));

        match self {
            Self::Get { filter } => {
                if let Some(filter) = filter {
                    push(&mut op, filter.to_element(NS_BASE));
                }
            }
            Self::GetConfig { source, filter } => {
                push(&mut op, source.to_element("source"));
                if let Some(filter) = filter {
                    push(&mut op, filter.to_element(NS_BASE));
                }
            }
            Self::EditConfig(edit) => {
                push(&mut op, edit.target.to_element("target"));
                if let Some(default) = edit.default_operation {
                    push(&mut op, Element::leaf(base("default-operation"), default.as_str()));
                }
                if let Some(test) = edit.test_option {
                    push(&mut op, Element::leaf(base("test-option"), test.as_str()));
                }
                if let Some(error) = edit.error_option {
                    push(&mut op, Element::leaf(base("error-option"), error.as_str()));
                }
                push(&mut op, wrap_config(edit.config.clone()));
            }
            Self::CopyConfig { target, source } => {
                push(&mut op, target.to_element("target"));
                push(&mut op, source.to_element());
            }
            Self::DeleteConfig { target } | Self::Lock { target } | Self::Unlock { target } => {
                push(&mut op, target.to_element("target"));
            }
            Self::Validate { source } => push(&mut op, source.to_element()),
            Self::Commit(commit) => {
                if commit.confirmed {
                    push(&mut op, Element::new(base("confirmed")));
                    if let Some(timeout) = commit.confirm_timeout {
                        push(&mut op, Element::leaf(base("confirm-timeout"), timeout.to_string()));
                    }
                    if let Some(persist) = &commit.persist {
                        push(&mut op, Element::leaf(base("persist"), persist.as_str()));
                    }
                }
                if let Some(id) = &commit.persist_id {
                    push(&mut op, Element::leaf(base("persist-id"), id.as_str()));
                }
            }
            Self::CancelCommit { persist_id } => {
                if let Some(id) = persist_id {
                    push(&mut op, Element::leaf(base("persist-id"), id.as_str()));
                }
            }
            Self::KillSession { session_id } => {
                push(&mut op, Element::leaf(base("session-id"), session_id.to_string()));
            }
            Self::CreateSubscription(sub) => {
                let ns = |tag: &str| Tagpath::new(NS_NOTIFICATION, tag);
                if let Some(stream) = &sub.stream {
                    push(&mut op, Element::leaf(ns("stream"), stream.as_str()));
                }
                if let Some(filter) = &sub.filter {
                    push(&mut op, filter.to_element(NS_NOTIFICATION));
                }
                if let Some(start) = &sub.start_time {
                    push(&mut op, Element::leaf(ns("startTime"), start.as_str()));
                }
                if let Some(stop) = &sub.stop_time {
                    push(&mut op, Element::leaf(ns("stopTime"), stop.as_str()));
                }
            }
            Self::DiscardChanges | Self::CloseSession | Self::Custom(_) => {}
        }

        op
    }
}
