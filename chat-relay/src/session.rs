//! Per-connection control flow.
//!
//! A session starts `Connected`, becomes `Registered` once a `USER`
//! command is accepted, relays every line it reads until the peer quits or
//! goes away, and then runs its close sequence exactly once: farewell,
//! unregister, departure notice, transport release.

use std::{net::SocketAddr, sync::Arc};

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{self, ConnectionHandle, ConnectionId},
    protocol,
    server::RelayState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    Closing,
    Closed,
}

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a quit line.
    Quit,
    /// The peer closed its side of the connection.
    PeerClosed,
    /// Reading from the peer failed.
    TransportError,
    /// The peer sent a line longer than the configured limit.
    LineTooLong,
    /// Registration was refused.
    Rejected,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Last line sent to the peer, if this reason has one.
    fn notice(self) -> Option<&'static str> {
        match self {
            Self::Quit => Some(protocol::FAREWELL),
            Self::LineTooLong => Some(protocol::ERR_INPUTTOOLONG),
            Self::Shutdown => Some(protocol::SHUTDOWN_NOTICE),
            Self::PeerClosed | Self::TransportError | Self::Rejected => None,
        }
    }
}

enum Inbound {
    Line(String),
    Closed(CloseReason),
}

pub struct Session<R> {
    id: ConnectionId,
    peer: SocketAddr,
    lines: FramedRead<R, LinesCodec>,
    handle: ConnectionHandle,
    writer: JoinHandle<()>,
    state: SessionState,
    relay: Arc<RelayState>,
    shutdown: CancellationToken,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap an accepted transport and start its writer task.
    pub fn open<W>(
        reader: R,
        writer: W,
        peer: SocketAddr,
        relay: Arc<RelayState>,
        shutdown: CancellationToken,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = relay.ids.allocate();
        let (handle, outbox) = connection::outbox(id, peer, relay.config.outbox_capacity);
        let writer = tokio::spawn(connection::drain_outbox(writer, outbox, id));
        let lines = FramedRead::new(reader, protocol::line_codec(relay.config.max_line_len));

        Self {
            id,
            peer,
            lines,
            handle,
            writer,
            state: SessionState::Connected,
            relay,
            shutdown,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Drive the session to completion.
    pub async fn run(mut self) -> CloseReason {
        debug!(connection = %self.id, peer = %self.peer, "session opened");

        let reason = match self.register().await {
            Ok(nickname) => {
                self.relay
                    .broadcaster
                    .announce_join(&nickname, self.id)
                    .await;
                self.relay_lines(&nickname).await
            }
            Err(reason) => reason,
        };

        self.close(reason).await;
        reason
    }

    async fn register(&mut self) -> Result<String, CloseReason> {
        loop {
            let line = match self.next_line().await {
                Inbound::Line(line) => line,
                Inbound::Closed(reason) => return Err(reason),
            };

            let Some(registration) = protocol::parse_registration(&line) else {
                if protocol::is_quit(&line) {
                    return Err(CloseReason::Quit);
                }
                self.reply(protocol::ERR_NOTREGISTERED).await;
                continue;
            };

            match self.relay.registry.register(&registration, &self.handle).await {
                Ok(()) => {
                    self.transition(SessionState::Registered);
                    info!(
                        peer = %self.peer,
                        nickname = %registration.username,
                        realname = %registration.realname,
                        "client joined"
                    );
                    self.reply(protocol::welcome(&registration.username)).await;
                    return Ok(registration.username);
                }
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "registration refused");
                    self.reply(err.reply()).await;
                    return Err(CloseReason::Rejected);
                }
            }
        }
    }

    async fn relay_lines(&mut self, nickname: &str) -> CloseReason {
        loop {
            let line = match self.next_line().await {
                Inbound::Line(line) => line,
                Inbound::Closed(reason) => return reason,
            };

            if protocol::is_quit(&line) {
                return CloseReason::Quit;
            }
            if protocol::parse_registration(&line).is_some() {
                self.reply(protocol::ERR_REREGISTER).await;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            self.relay
                .broadcaster
                .relay_chat(nickname, &line, self.id)
                .await;
        }
    }

    async fn next_line(&mut self) -> Inbound {
        let frame = select! {
            biased;
            _ = self.shutdown.cancelled() => return Inbound::Closed(CloseReason::Shutdown),
            frame = self.lines.next() => frame,
        };

        match frame {
            Some(Ok(line)) => Inbound::Line(line),
            None => Inbound::Closed(CloseReason::PeerClosed),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(
                    peer = %self.peer,
                    limit = self.relay.config.max_line_len,
                    "client sent an over-long line"
                );
                Inbound::Closed(CloseReason::LineTooLong)
            }
            Some(Err(LinesCodecError::Io(err))) => {
                debug!(peer = %self.peer, error = ?err, "failed to read from client");
                Inbound::Closed(CloseReason::TransportError)
            }
        }
    }

    /// Queue a reply for our own peer, giving up if the server shuts down
    /// while the peer is not reading.
    async fn reply(&self, line: impl Into<Arc<str>>) {
        let queued = select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(connection = %self.id, "shutdown while queueing reply");
                return;
            }
            queued = self.handle.send(line) => queued,
        };
        if let Err(err) = queued {
            debug!(connection = %self.id, error = %err, "failed to queue reply");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection = %self.id, from = ?self.state, to = ?next, "session state changed");
        self.state = next;
    }

    async fn close(mut self, reason: CloseReason) {
        self.transition(SessionState::Closing);

        // Never wait on our own outbox here; the peer may already be gone.
        if let Some(notice) = reason.notice() {
            if let Err(err) = self.handle.deliver(Arc::from(notice)) {
                debug!(connection = %self.id, error = %err, "failed to queue final notice");
            }
        }

        if let Some(nickname) = self.relay.registry.unregister(self.id).await {
            info!(peer = %self.peer, %nickname, ?reason, "client disconnected");
            self.relay
                .broadcaster
                .announce_departure(&nickname, self.id)
                .await;
        }

        // The writer exits once every handle is gone: ours, and the
        // registry's clone which was dropped by `unregister`.
        drop(self.handle);
        drop(self.lines);
        let mut writer = self.writer;
        if timeout(self.relay.config.shutdown_grace, &mut writer)
            .await
            .is_err()
        {
            debug!(connection = %self.id, "client writer did not drain in time");
            writer.abort();
        }

        debug!(
            connection = %self.id,
            from = ?self.state,
            to = ?SessionState::Closed,
            ?reason,
            "session closed"
        );
    }
}
