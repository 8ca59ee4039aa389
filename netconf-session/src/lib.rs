//! The NETCONF client session engine.
//!
//! A [`NetconfSession`] is a cheap handle to a background driver task that owns
//! the framed transport. The driver correlates the single outstanding request
//! with its reply and routes notifications to a separate stream.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use netconf_model::{schema::ValidationError, Element, Registry};
use netconf_wire::{envelope, framing, Capabilities, RpcErrors};
use thiserror::Error;
use tokio::sync::oneshot;

mod driver;
pub mod operations;
mod session;
mod stats;

pub use operations::{
    Commit, ConfigSource, Datastore, DefaultOperation, EditConfig, ErrorOption, Filter, Operation,
    Subscription, TestOption,
};
pub use session::*;
pub use stats::SessionStats;

pub use netconf_wire::{envelope::Notification, FramingMode};

const DEFAULT_COMMAND_BUFFER: usize = 4;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Hello exchange failed: {0}")]
    HelloFailed(String),
    #[error("Framing error: {0}")]
    Framing(#[from] framing::Error),
    #[error("Malformed message: {0}")]
    Envelope(#[from] envelope::Error),
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Session closed")]
    SessionClosed,
    #[error("Another operation is in progress")]
    OperationInProgress,
    #[error("Operation timed out")]
    OperationTimeout,
    #[error("Server returned errors: {0}")]
    Rpc(RpcErrors),
    #[error("Reply to message {received} while waiting for {expected}")]
    MessageIdMismatch { expected: u32, received: u32 },
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Transport error: {0:?}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SessionError {
    /// The server's errors, if this is a server-reported failure.
    pub fn rpc_errors(&self) -> Option<&RpcErrors> {
        match self {
            Self::Rpc(errors) => Some(errors),
            _ => None,
        }
    }
}

/// The lifecycle of a session. A handle only exists once the hello exchange
/// has completed, so it is never observed before `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No operation is outstanding.
    Ready,
    /// An operation is waiting for its reply.
    Busy,
    /// Terminal. Every operation fails with [`SessionError::SessionClosed`].
    Closed,
}

pub(crate) enum Command {
    Request {
        operation: Element,
        /// Shuts the driver down once the reply arrives (`close-session`).
        closes: bool,
        response: oneshot::Sender<Result<envelope::Reply, SessionError>>,
    },
    /// Drops the transport without a `close-session`.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The capabilities advertised in the client hello.
    pub capabilities: Capabilities,
    /// How long to wait for the server hello.
    pub hello_timeout: Duration,
    /// How long to wait for each reply. A timed out session is unusable.
    pub timeout: Duration,
    /// Inbound size limits and outbound chunk size.
    pub limits: framing::Limits,
    /// Notifications buffered before new ones are dropped.
    pub notification_buffer_size: usize,
    /// When set, outbound `<edit-config>` content and `<get>`/`<get-config>`
    /// data are checked against this registry.
    pub registry: Option<Arc<Registry>>,
}

impl SessionOptions {
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: framing::Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_notification_buffer_size(mut self, size: usize) -> Self {
        self.notification_buffer_size = size;
        self
    }

    /// Validates outbound configuration and inbound data against `registry`.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capabilities: Capabilities::client_default(),
            hello_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            limits: framing::Limits::default(),
            notification_buffer_size: 1024,
            registry: None,
        }
    }
}

/// The session state, shared between the driver task and every handle.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) stats: SessionStats,
    closed: AtomicBool,
    in_flight: AtomicBool,
}

impl SessionState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the single request slot. Returns false if it is taken.
    pub(crate) fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
