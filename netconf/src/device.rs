use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;

use netconf_model::{Element, Tagpath};
use netconf_session::{EditConfig, NetconfSession, SessionError, SessionOptions};
use netconf_transport::Transport;
use netconf_wire::NS_BASE;

/// The tree a session name starts with: an empty `<config>`.
fn empty_tree() -> Element {
    Element::new(Tagpath::new(NS_BASE, "config"))
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("A session named {0:?} already exists")]
    BadSessionName(String),
    #[error("No session named {0:?}")]
    UnknownSession(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A managed device: named sessions over one transport, a configuration tree
/// per session name, and a backlog of edits per session name.
///
/// Configuration trees and backlogs outlive sessions, so changes can be
/// accumulated while a device is unreachable. The backlog is never replayed
/// implicitly; call [`Device::run_backlog`] once a session is up.
#[derive(Debug)]
pub struct Device<T: Transport> {
    name: String,
    transport: T,
    addr: T::Addr,
    options: SessionOptions,
    /// Operation timeouts overriding `options.timeout` per session name.
    timeouts: FxHashMap<String, Duration>,
    sessions: FxHashMap<String, NetconfSession>,
    trees: FxHashMap<String, Element>,
    backlog: FxHashMap<String, Vec<EditConfig>>,
}

impl<T: Transport> Device<T> {
    pub fn new(name: impl Into<String>, transport: T, addr: T::Addr) -> Self {
        Self::with_options(name, transport, addr, SessionOptions::default())
    }

    /// Creates a device whose sessions are opened with `options`.
    pub fn with_options(
        name: impl Into<String>,
        transport: T,
        addr: T::Addr,
        options: SessionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            addr,
            options,
            timeouts: FxHashMap::default(),
            sessions: FxHashMap::default(),
            trees: FxHashMap::default(),
            backlog: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn addr(&self) -> &T::Addr {
        &self.addr
    }

    /// Opens a session named `session_name`. Fails with
    /// [`DeviceError::BadSessionName`] if one is already open under that name.
    /// The session's configuration tree is created even if connecting fails.
    pub async fn new_session(&mut self, session_name: &str) -> Result<&NetconfSession, DeviceError> {
        self.new_session_config_tree(session_name);

        if self.sessions.contains_key(session_name) {
            return Err(DeviceError::BadSessionName(session_name.to_string()));
        }

        let options = self.options.clone().with_timeout(self.timeout(session_name));
        let session = NetconfSession::connect(&self.transport, self.addr.clone(), options).await?;
        tracing::debug!(
            device = %self.name,
            session = session_name,
            session_id = session.session_id(),
            timeout = ?session.options().timeout,
            "Opened session"
        );

        Ok(self.sessions.entry(session_name.to_string()).or_insert(session))
    }

    /// Sets the operation timeout for sessions without their own.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.options.timeout = timeout;
    }

    /// Sets the operation timeout of `session_name`. Applies from the next
    /// time a session with that name is opened.
    pub fn set_timeout(&mut self, session_name: &str, timeout: Duration) {
        self.timeouts.insert(session_name.to_string(), timeout);
    }

    /// The operation timeout a session named `session_name` is opened with.
    pub fn timeout(&self, session_name: &str) -> Duration {
        self.timeouts.get(session_name).copied().unwrap_or(self.options.timeout)
    }

    pub fn session(&self, session_name: &str) -> Option<&NetconfSession> {
        self.sessions.get(session_name)
    }

    pub fn has_session(&self, session_name: &str) -> bool {
        self.sessions.contains_key(session_name)
    }

    /// Closes and forgets the session. Its configuration tree and backlog stay.
    pub async fn close_session(&mut self, session_name: &str) -> Result<(), DeviceError> {
        let session = self
            .sessions
            .remove(session_name)
            .ok_or_else(|| DeviceError::UnknownSession(session_name.to_string()))?;

        match session.close().await {
            // Already gone is as good as closed
            Ok(()) | Err(SessionError::SessionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Closes every session. Failures are logged, not returned.
    pub async fn close(&mut self) {
        for (name, session) in self.sessions.drain() {
            if let Err(e) = session.close().await {
                tracing::warn!(device = %self.name, session = %name, "Failed to close session: {e}");
            }
        }
    }

    /// Creates an empty configuration tree for `session_name` unless one exists.
    pub fn new_session_config_tree(&mut self, session_name: &str) {
        if !self.trees.contains_key(session_name) {
            self.trees.insert(session_name.to_string(), empty_tree());
        }
    }

    /// Replaces the configuration tree of `session_name`.
    pub fn set_config(&mut self, session_name: &str, config: Element) {
        self.trees.insert(session_name.to_string(), config);
    }

    pub fn config(&self, session_name: &str) -> Option<&Element> {
        self.trees.get(session_name)
    }

    pub fn config_mut(&mut self, session_name: &str) -> Option<&mut Element> {
        self.trees.get_mut(session_name)
    }

    /// Whether `session_name` has a tree with content.
    pub fn has_config(&self, session_name: &str) -> bool {
        self.trees
            .get(session_name)
            .is_some_and(|tree| tree.has_children() || tree.value().is_some())
    }

    /// Resets the configuration tree of `session_name` to an empty one.
    pub fn clear_config(&mut self, session_name: &str) {
        if let Some(tree) = self.trees.get_mut(session_name) {
            *tree = empty_tree();
        }
    }

    /// Queues an edit for `session_name`.
    pub fn add_backlog(&mut self, session_name: &str, edit: EditConfig) {
        self.backlog.entry(session_name.to_string()).or_default().push(edit);
    }

    pub fn backlog(&self, session_name: &str) -> &[EditConfig] {
        self.backlog.get(session_name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_backlog(&self, session_name: &str) -> bool {
        !self.backlog(session_name).is_empty()
    }

    /// Sends the queued edits of `session_name` in order. Each entry leaves
    /// the backlog only once the server accepted it; the first failure stops
    /// the run and keeps the failed entry and everything after it.
    ///
    /// Returns the number of edits applied.
    pub async fn run_backlog(&mut self, session_name: &str) -> Result<usize, DeviceError> {
        let session = self
            .sessions
            .get(session_name)
            .ok_or_else(|| DeviceError::UnknownSession(session_name.to_string()))?;
        let Some(queue) = self.backlog.get_mut(session_name) else {
            return Ok(0);
        };

        let mut applied = 0;
        while let Some(edit) = queue.first() {
            session.edit_config(edit.clone()).await?;
            queue.remove(0);
            applied += 1;
        }

        tracing::debug!(device = %self.name, session = session_name, applied, "Backlog replayed");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use futures::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    use netconf_session::Datastore;
    use netconf_wire::{
        envelope, framing, Capabilities, ErrorTag, ErrorType, FramingMode, RpcError,
    };

    use super::*;

    /// Operation elements received by the loopback server.
    type Received = Arc<Mutex<Vec<Element>>>;

    /// Connects to an in-process server that accepts every request except
    /// edits carrying a leaf with the value `reject`.
    #[derive(Debug, Default)]
    struct Loopback {
        received: Received,
    }

    #[async_trait::async_trait]
    impl Transport for Loopback {
        type Addr = &'static str;
        type Io = DuplexStream;
        type Error = io::Error;

        async fn connect(&self, _addr: &'static str) -> Result<DuplexStream, io::Error> {
            let (client, server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(serve(server, Arc::clone(&self.received)));
            Ok(client)
        }
    }

    fn rejects(element: &Element) -> bool {
        element.value() == Some("reject") || element.children().iter().any(rejects)
    }

    async fn serve(io: DuplexStream, received: Received) {
        let caps = Capabilities::client_default();
        let mut conn = Framed::new(io, framing::Codec::new());
        conn.send(envelope::encode_server_hello(&caps, 1)).await.unwrap();

        let hello = envelope::decode_hello(&conn.next().await.unwrap().unwrap()).unwrap();
        conn.codec_mut().set_mode(FramingMode::negotiate(&caps, &hello.capabilities));

        while let Some(Ok(frame)) = conn.next().await {
            let mut rpc = Element::parse_xml(&frame).unwrap();
            let id: u32 = rpc.attribute("message-id").unwrap().parse().unwrap();
            let op = rpc.take_children().pop().unwrap();
            let closes = op.tag() == "close-session";

            let reply = if rejects(&op) {
                let error = RpcError::new(ErrorType::Application, ErrorTag::InvalidValue);
                envelope::encode_reply(id, vec![error.to_element()])
            } else {
                envelope::encode_reply(id, vec![])
            };
            received.lock().push(op);
            conn.send(reply).await.unwrap();

            if closes {
                break;
            }
        }
    }

    fn hostname(value: &str) -> EditConfig {
        let config = Element::leaf(Tagpath::new("urn:x:system", "hostname"), value);
        EditConfig::new(Datastore::Running, config)
    }

    fn device() -> (Device<Loopback>, Received) {
        let transport = Loopback::default();
        let received = Arc::clone(&transport.received);
        (Device::new("r1", transport, "r1.lab"), received)
    }

    #[tokio::test]
    async fn session_names_are_unique() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut device, _) = device();
        device.new_session("cfg").await.unwrap();
        assert!(device.has_session("cfg"));
        assert!(device.config("cfg").is_some());
        assert!(!device.has_config("cfg"));

        let err = device.new_session("cfg").await.unwrap_err();
        assert!(matches!(err, DeviceError::BadSessionName(ref name) if name == "cfg"));

        device.close_session("cfg").await.unwrap();
        assert!(!device.has_session("cfg"));
        assert!(matches!(
            device.close_session("cfg").await.unwrap_err(),
            DeviceError::UnknownSession(_)
        ));

        // The name is free again
        device.new_session("cfg").await.unwrap();
        device.close().await;
        assert!(!device.has_session("cfg"));
    }

    #[tokio::test]
    async fn sessions_open_with_their_own_timeout() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut device, _) = device();
        device.set_default_timeout(Duration::from_secs(5));
        device.set_timeout("slow", Duration::from_secs(120));
        assert_eq!(device.timeout("fast"), Duration::from_secs(5));
        assert_eq!(device.timeout("slow"), Duration::from_secs(120));

        let fast = device.new_session("fast").await.unwrap().options().timeout;
        let slow = device.new_session("slow").await.unwrap().options().timeout;
        assert_eq!(fast, Duration::from_secs(5));
        assert_eq!(slow, Duration::from_secs(120));

        // An override only reaches sessions opened afterwards
        device.set_timeout("fast", Duration::from_secs(1));
        assert_eq!(device.session("fast").unwrap().options().timeout, Duration::from_secs(5));

        device.close_session("fast").await.unwrap();
        let fast = device.new_session("fast").await.unwrap().options().timeout;
        assert_eq!(fast, Duration::from_secs(1));

        device.close().await;
    }

    #[tokio::test]
    async fn config_trees_outlive_sessions() {
        let (mut device, _) = device();

        device.set_config("cfg", Element::leaf(Tagpath::new("urn:x", "motd"), "hi"));
        assert!(device.has_config("cfg"));

        device.new_session("cfg").await.unwrap();
        device.close_session("cfg").await.unwrap();
        assert_eq!(device.config("cfg").and_then(Element::value), Some("hi"));

        device.clear_config("cfg");
        assert!(!device.has_config("cfg"));
    }

    #[tokio::test]
    async fn backlog_is_replayed_only_on_request() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut device, received) = device();
        device.add_backlog("cfg", hostname("a"));
        device.add_backlog("cfg", hostname("b"));
        assert_eq!(device.backlog("cfg").len(), 2);
        assert!(!device.has_backlog("other"));

        device.new_session("cfg").await.unwrap();
        assert!(received.lock().is_empty());
        assert!(device.has_backlog("cfg"));

        assert_eq!(device.run_backlog("cfg").await.unwrap(), 2);
        assert!(!device.has_backlog("cfg"));

        let edits = received.lock();
        assert_eq!(edits.len(), 2);
        assert!(edits.iter().all(|op| op.tag() == "edit-config"));
    }

    #[tokio::test]
    async fn failed_backlog_entry_is_kept() {
        let _ = tracing_subscriber::fmt::try_init();

        let (mut device, received) = device();
        device.add_backlog("cfg", hostname("a"));
        device.add_backlog("cfg", hostname("reject"));
        device.add_backlog("cfg", hostname("c"));

        device.new_session("cfg").await.unwrap();
        let err = device.run_backlog("cfg").await.unwrap_err();
        assert!(matches!(err, DeviceError::Session(SessionError::Rpc(_))));

        assert_eq!(device.backlog("cfg"), &[hostname("reject"), hostname("c")]);
        assert_eq!(received.lock().len(), 2);
    }

    #[tokio::test]
    async fn run_backlog_requires_session() {
        let (mut device, _) = device();
        device.add_backlog("cfg", hostname("a"));
        assert!(matches!(
            device.run_backlog("cfg").await.unwrap_err(),
            DeviceError::UnknownSession(_)
        ));
        assert!(device.has_backlog("cfg"));
    }
}
