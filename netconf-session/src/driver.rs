use bytes::Bytes;
use futures::{Future, SinkExt, StreamExt};
use std::{
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Instant,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_util::codec::Framed;

use netconf_wire::{
    envelope::{self, Message, Notification, Reply},
    framing,
};

use crate::{Command, SessionError, SessionState};

/// The session driver. Owns the framed transport and drives the session
/// forward until it closes.
pub(crate) struct SessionDriver<Io: AsyncRead + AsyncWrite> {
    /// State shared with the session handles.
    pub(crate) state: Arc<SessionState>,
    /// The server-assigned session id, for logging.
    pub(crate) session_id: u32,
    /// The [`Framed`] connection, already switched to the negotiated framing.
    pub(crate) conn: Framed<Io, framing::Codec>,
    /// Commands from the session handles.
    pub(crate) from_session: mpsc::Receiver<Command>,
    /// The message-id of the next request. Starts at 1.
    pub(crate) next_message_id: u32,
    /// The encoded request waiting for the sink to become ready.
    pub(crate) egress: Option<Bytes>,
    /// The outstanding request, if any.
    pub(crate) pending: Option<PendingRequest>,
    /// Notification sink. Full or closed sinks drop notifications.
    pub(crate) notifications: mpsc::Sender<Notification>,
    /// Set once the connection should be closed.
    pub(crate) shutting_down: bool,
}

pub(crate) struct PendingRequest {
    message_id: u32,
    start: Instant,
    closes: bool,
    sender: oneshot::Sender<Result<Reply, SessionError>>,
}

impl<Io: AsyncRead + AsyncWrite> SessionDriver<Io> {
    fn next_message_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = id.checked_add(1).unwrap_or(1);
        id
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Request {
                operation,
                closes,
                response,
            } => {
                if self.pending.is_some() {
                    let _ = response.send(Err(SessionError::OperationInProgress));
                    return;
                }

                let message_id = self.next_message_id();
                tracing::debug!(session_id = self.session_id, message_id, op = operation.tag(), "Sending request");

                self.egress = Some(envelope::encode_request(message_id, operation));
                self.pending = Some(PendingRequest {
                    message_id,
                    start: Instant::now(),
                    closes,
                    sender: response,
                });
            }
            Command::Shutdown => {
                tracing::debug!(session_id = self.session_id, "Shutdown requested");
                self.terminate(SessionError::SessionClosed);
            }
        }
    }

    fn on_frame(&mut self, frame: Bytes) {
        tracing::trace!(session_id = self.session_id, size = frame.len(), "Received frame");
        self.state.stats.increment_rx(frame.len());

        match envelope::decode_message(&frame) {
            Ok(Message::Reply(reply)) => self.on_reply(reply),
            Ok(Message::Notification(notification)) => self.on_notification(notification),
            Ok(Message::Hello(_)) => {
                tracing::error!(session_id = self.session_id, "Received hello on an established session");
                self.terminate(SessionError::SessionClosed);
            }
            Err(e) => {
                tracing::error!(session_id = self.session_id, "Failed to decode message: {e}");
                self.terminate(SessionError::Envelope(e));
            }
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        let Some(pending) = self.pending.take() else {
            tracing::error!(
                session_id = self.session_id,
                message_id = ?reply.message_id(),
                "Received reply without an outstanding request"
            );
            self.terminate(SessionError::SessionClosed);
            return;
        };

        match reply.message_id() {
            Some(id) if id != pending.message_id => {
                tracing::error!(
                    session_id = self.session_id,
                    expected = pending.message_id,
                    received = id,
                    "Message-id mismatch"
                );
                let _ = pending.sender.send(Err(SessionError::MessageIdMismatch {
                    expected: pending.message_id,
                    received: id,
                }));
                self.terminate(SessionError::SessionClosed);
                return;
            }
            Some(_) => {}
            None => tracing::warn!(
                session_id = self.session_id,
                message_id = pending.message_id,
                "Reply carries no message-id, assuming it answers the outstanding request"
            ),
        }

        self.state.stats.update_rtt(pending.start.elapsed().as_micros() as usize);
        let _ = pending.sender.send(Ok(reply));

        if pending.closes {
            tracing::debug!(session_id = self.session_id, "Session closed by request");
            self.state.close();
            self.shutting_down = true;
        }
    }

    fn on_notification(&mut self, notification: Notification) {
        self.state.stats.increment_notifications();

        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.state.stats.increment_dropped();
                tracing::warn!(session_id = self.session_id, "Notification buffer full, dropping notification");
            }
            Err(TrySendError::Closed(_)) => {
                self.state.stats.increment_dropped();
                tracing::trace!(session_id = self.session_id, "Notification stream dropped");
            }
        }
    }

    /// Closes the session, failing the outstanding request with `error`.
    fn terminate(&mut self, error: SessionError) {
        self.state.close();
        self.egress = None;
        if let Some(pending) = self.pending.take() {
            let _ = pending.sender.send(Err(error));
        }
        self.shutting_down = true;
    }
}

impl<Io: AsyncRead + AsyncWrite + Unpin> Future for SessionDriver<Io> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            if this.shutting_down {
                let _ = ready!(this.conn.poll_close_unpin(cx));
                // Queued commands fail with `SessionClosed` once their senders drop.
                this.from_session.close();
                return Poll::Ready(());
            }

            if let Poll::Ready(Err(e)) = this.conn.poll_flush_unpin(cx) {
                tracing::error!(session_id = this.session_id, "Failed to flush connection: {e}");
                this.terminate(SessionError::SessionClosed);
                continue;
            }

            match this.conn.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    this.on_frame(frame);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::error!(session_id = this.session_id, "Transport fault: {e}");
                    this.terminate(SessionError::SessionClosed);
                    continue;
                }
                Poll::Ready(None) => {
                    tracing::debug!(session_id = this.session_id, "Connection closed by peer");
                    this.terminate(SessionError::SessionClosed);
                    continue;
                }
                Poll::Pending => {}
            }

            if this.egress.is_some() {
                match this.conn.poll_ready_unpin(cx) {
                    Poll::Ready(Ok(())) => {
                        let Some(msg) = this.egress.take() else { continue };
                        let size = msg.len();
                        match this.conn.start_send_unpin(msg) {
                            Ok(()) => this.state.stats.increment_tx(size),
                            Err(e) => {
                                tracing::error!(session_id = this.session_id, "Failed to send request: {e}");
                                this.terminate(SessionError::SessionClosed);
                            }
                        }
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        tracing::error!(session_id = this.session_id, "Connection not ready: {e}");
                        this.terminate(SessionError::SessionClosed);
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            match this.from_session.poll_recv(cx) {
                Poll::Ready(Some(command)) => {
                    this.on_command(command);
                    continue;
                }
                Poll::Ready(None) => {
                    tracing::debug!(session_id = this.session_id, "All session handles dropped, closing connection");
                    this.terminate(SessionError::SessionClosed);
                    continue;
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
