use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::Framed;

use netconf_model::{Element, Tagpath};
use netconf_transport::Transport;
use netconf_wire::{
    envelope::{self, Notification, Reply},
    framing, Capabilities, FramingMode, NS_BASE,
};

use crate::{
    driver::SessionDriver, operations::wrap_config, Command, Commit, ConfigSource, Datastore,
    EditConfig, Filter, Operation, SessionError, SessionOptions, SessionState, SessionStats,
    SessionStatus, Subscription, DEFAULT_COMMAND_BUFFER,
};

/// The stream of notifications received on a session.
pub type Notifications = ReceiverStream<Notification>;

/// Facts learned in the hello exchange, fixed for the life of the session.
#[derive(Debug)]
struct SessionInfo {
    session_id: u32,
    server_capabilities: Capabilities,
    framing_mode: FramingMode,
}

/// A handle to an established NETCONF session.
///
/// Handles are cheap to clone and all drive the same session. Only one
/// operation may be outstanding at a time; a second one fails immediately
/// with [`SessionError::OperationInProgress`].
#[derive(Debug, Clone)]
pub struct NetconfSession {
    /// Command channel to the driver task.
    to_driver: mpsc::Sender<Command>,
    /// Options for the session.
    options: Arc<SessionOptions>,
    /// Session state. This is shared with the driver task.
    state: Arc<SessionState>,
    info: Arc<SessionInfo>,
    /// The notification receiver, until someone takes it.
    notifications: Arc<Mutex<Option<mpsc::Receiver<Notification>>>>,
}

impl NetconfSession {
    /// Runs the hello exchange over `io` and spawns the session driver.
    pub async fn open<Io>(io: Io, options: SessionOptions) -> Result<Self, SessionError>
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut conn = Framed::new(io, framing::Codec::with_limits(options.limits));

        conn.send(envelope::encode_hello(&options.capabilities)).await?;
        tracing::trace!("Sent hello");

        let frame = match tokio::time::timeout(options.hello_timeout, conn.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Err(SessionError::HelloFailed(e.to_string())),
            Ok(None) => {
                return Err(SessionError::HelloFailed(
                    "connection closed before the server hello".to_string(),
                ))
            }
            Err(_) => {
                return Err(SessionError::HelloFailed(
                    "timed out waiting for the server hello".to_string(),
                ))
            }
        };

        let hello =
            envelope::decode_hello(&frame).map_err(|e| SessionError::HelloFailed(e.to_string()))?;
        let session_id = hello
            .session_id
            .ok_or_else(|| SessionError::HelloFailed("server hello has no session-id".to_string()))?;

        let framing_mode = FramingMode::negotiate(&options.capabilities, &hello.capabilities);
        conn.codec_mut().set_mode(framing_mode);

        tracing::debug!(session_id, ?framing_mode, "Session established");

        let (to_driver, from_session) = mpsc::channel(DEFAULT_COMMAND_BUFFER);
        let (notifications_tx, notifications_rx) =
            mpsc::channel(options.notification_buffer_size.max(1));
        let state = Arc::new(SessionState::default());

        let driver = SessionDriver {
            state: Arc::clone(&state),
            session_id,
            conn,
            from_session,
            next_message_id: 1,
            egress: None,
            pending: None,
            notifications: notifications_tx,
            shutting_down: false,
        };

        tokio::spawn(driver);

        Ok(Self {
            to_driver,
            options: Arc::new(options),
            state,
            info: Arc::new(SessionInfo {
                session_id,
                server_capabilities: hello.capabilities,
                framing_mode,
            }),
            notifications: Arc::new(Mutex::new(Some(notifications_rx))),
        })
    }

    /// Connects to `addr` over `transport` and opens a session on the stream.
    pub async fn connect<T: Transport>(
        transport: &T,
        addr: T::Addr,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        tracing::debug!(?addr, "Connecting");
        let io = transport
            .connect(addr)
            .await
            .map_err(|e| SessionError::Transport(Box::new(e)))?;

        Self::open(io, options).await
    }

    /// The session-id assigned by the server.
    #[inline]
    pub fn session_id(&self) -> u32 {
        self.info.session_id
    }

    #[inline]
    pub fn server_capabilities(&self) -> &Capabilities {
        &self.info.server_capabilities
    }

    #[inline]
    pub fn framing_mode(&self) -> FramingMode {
        self.info.framing_mode
    }

    #[inline]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn status(&self) -> SessionStatus {
        if self.state.is_closed() {
            SessionStatus::Closed
        } else if self.state.is_in_flight() {
            SessionStatus::Busy
        } else {
            SessionStatus::Ready
        }
    }

    pub fn stats(&self) -> &SessionStats {
        &self.state.stats
    }

    /// Takes the notification stream. Returns `None` if it was already taken.
    /// Notifications that arrive while nobody reads the stream are buffered up
    /// to [`SessionOptions::notification_buffer_size`], then dropped.
    pub fn take_notifications(&self) -> Option<Notifications> {
        self.notifications.lock().take().map(ReceiverStream::new)
    }

    /// Issues `operation` and returns the `<rpc-reply>` element on success.
    /// A reply carrying any `<rpc-error>` fails with [`SessionError::Rpc`].
    pub async fn call(&self, operation: Operation) -> Result<Element, SessionError> {
        let closes = matches!(operation, Operation::CloseSession);
        self.request(operation.to_element(), closes).await
    }

    async fn request(&self, operation: Element, closes: bool) -> Result<Element, SessionError> {
        if self.state.is_closed() {
            return Err(SessionError::SessionClosed);
        }

        let guard = InFlight::begin(&self.state, &self.to_driver)?;

        let (response_tx, response_rx) = oneshot::channel();
        self.to_driver
            .send(Command::Request {
                operation,
                closes,
                response: response_tx,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;

        let reply = match tokio::time::timeout(self.options.timeout, response_rx).await {
            Ok(response) => response.map_err(|_| SessionError::SessionClosed)??,
            Err(_) => {
                tracing::warn!(
                    session_id = self.session_id(),
                    timeout = ?self.options.timeout,
                    "Operation timed out, session is no longer usable"
                );
                // Dropping the guard unfinished shuts the session down.
                return Err(SessionError::OperationTimeout);
            }
        };
        guard.finish();

        match reply {
            Reply::Success { payload, .. } => Ok(payload),
            Reply::Failure { errors, .. } => Err(SessionError::Rpc(errors.into())),
        }
    }

    async fn call_ok(&self, operation: Operation) -> Result<(), SessionError> {
        self.call(operation).await.map(|_| ())
    }

    /// Issues `<get>` and returns the `<data>` element.
    pub async fn get(&self, filter: Option<Filter>) -> Result<Element, SessionError> {
        let reply = self.call(Operation::Get { filter }).await?;
        self.take_data(reply)
    }

    /// Issues `<get-config>` and returns the `<data>` element.
    pub async fn get_config(
        &self,
        source: Datastore,
        filter: Option<Filter>,
    ) -> Result<Element, SessionError> {
        let reply = self.call(Operation::GetConfig { source, filter }).await?;
        self.take_data(reply)
    }

    /// Issues `<edit-config>`. With a registry configured, the content is
    /// validated first and nothing is sent if validation fails.
    pub async fn edit_config(&self, edit: EditConfig) -> Result<(), SessionError> {
        if let Some(registry) = &self.options.registry {
            let config = wrap_config(edit.config.clone());
            for child in config.children() {
                registry.validate_structure(child)?;
            }
        }
        self.call_ok(Operation::EditConfig(edit)).await
    }

    pub async fn copy_config(
        &self,
        target: Datastore,
        source: impl Into<ConfigSource>,
    ) -> Result<(), SessionError> {
        self.call_ok(Operation::CopyConfig {
            target,
            source: source.into(),
        })
        .await
    }

    pub async fn delete_config(&self, target: Datastore) -> Result<(), SessionError> {
        self.call_ok(Operation::DeleteConfig { target }).await
    }

    pub async fn lock(&self, target: Datastore) -> Result<(), SessionError> {
        self.call_ok(Operation::Lock { target }).await
    }

    pub async fn unlock(&self, target: Datastore) -> Result<(), SessionError> {
        self.call_ok(Operation::Unlock { target }).await
    }

    pub async fn validate(&self, source: impl Into<ConfigSource>) -> Result<(), SessionError> {
        self.call_ok(Operation::Validate {
            source: source.into(),
        })
        .await
    }

    pub async fn commit(&self, commit: Commit) -> Result<(), SessionError> {
        self.call_ok(Operation::Commit(commit)).await
    }

    pub async fn cancel_commit(&self, persist_id: Option<String>) -> Result<(), SessionError> {
        self.call_ok(Operation::CancelCommit { persist_id }).await
    }

    pub async fn discard_changes(&self) -> Result<(), SessionError> {
        self.call_ok(Operation::DiscardChanges).await
    }

    /// Terminates another session on the server. This session stays open.
    pub async fn kill_session(&self, session_id: u32) -> Result<(), SessionError> {
        self.call_ok(Operation::KillSession { session_id }).await
    }

    /// Subscribes to an event stream. Events arrive on [`Self::take_notifications`].
    pub async fn create_subscription(&self, subscription: Subscription) -> Result<(), SessionError> {
        self.call_ok(Operation::CreateSubscription(subscription)).await
    }

    /// Sends `<close-session>` and closes the session, whatever the reply.
    pub async fn close(&self) -> Result<(), SessionError> {
        let result = self.call_ok(Operation::CloseSession).await;
        if !matches!(result, Err(SessionError::OperationInProgress)) {
            self.state.close();
        }
        result
    }

    /// Drops the transport without a `<close-session>`.
    pub async fn abort(&self) {
        self.state.close();
        let _ = self.to_driver.send(Command::Shutdown).await;
    }

    /// Detaches the `<data>` element from a reply, validating its content if a
    /// registry is configured. A reply without `<data>` yields an empty one.
    fn take_data(&self, mut reply: Element) -> Result<Element, SessionError> {
        let tagpath = Tagpath::new(NS_BASE, "data");
        let data = reply.remove_child(&tagpath).unwrap_or_else(|| Element::new(tagpath));

        if let Some(registry) = &self.options.registry {
            for child in data.children() {
                registry.validate_structure(child)?;
            }
        }

        Ok(data)
    }
}

/// Holds the session's single request slot. Dropped without [`InFlight::finish`]
/// (timeout, cancelled future), the late reply can no longer be told apart from
/// the next one, so the session is shut down.
struct InFlight<'a> {
    state: &'a SessionState,
    to_driver: &'a mpsc::Sender<Command>,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn begin(
        state: &'a SessionState,
        to_driver: &'a mpsc::Sender<Command>,
    ) -> Result<Self, SessionError> {
        if !state.try_begin() {
            return Err(SessionError::OperationInProgress);
        }

        Ok(Self {
            state,
            to_driver,
            finished: false,
        })
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.state.is_closed() {
            self.state.close();
            let _ = self.to_driver.try_send(Command::Shutdown);
        }
        self.state.end();
    }
}
