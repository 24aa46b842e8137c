//! Per-connection handles and the writer task behind them.
//!
//! A session owns its socket. Everyone else, the registry included, only
//! holds a [`ConnectionHandle`], which can enqueue lines into the
//! connection's bounded outbox but never touches the transport itself.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::SinkExt;
use tokio::{
    io::AsyncWrite,
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::debug;

use crate::error::DeliveryError;

/// Process-unique identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out connection ids, starting at 1.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable, non-owning reference to one connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbox: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a line without waiting.
    ///
    /// Used for fan-out: a peer whose outbox is full loses the line instead
    /// of stalling the sender.
    pub fn deliver(&self, line: Arc<str>) -> Result<(), DeliveryError> {
        self.outbox.try_send(line).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue a line for this connection's own peer, waiting for room.
    pub async fn send(&self, line: impl Into<Arc<str>>) -> Result<(), DeliveryError> {
        self.outbox
            .send(line.into())
            .await
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Create a handle together with the receiving end of its outbox.
pub fn outbox(
    id: ConnectionId,
    peer: SocketAddr,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ConnectionHandle {
            id,
            peer,
            outbox: tx,
        },
        rx,
    )
}

/// Write queued lines to the transport until every handle is dropped.
///
/// A write failure ends the task; later deliveries then fail with
/// [`DeliveryError::Closed`].
pub async fn drain_outbox<W>(writer: W, mut outbox: mpsc::Receiver<Arc<str>>, id: ConnectionId)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    while let Some(line) = outbox.recv().await {
        if let Err(err) = sink.send(line).await {
            debug!(connection = %id, error = ?err, "failed to write to client");
            return;
        }
    }

    if let Err(err) = SinkExt::<Arc<str>>::close(&mut sink).await {
        debug!(connection = %id, error = ?err, "failed to shut down client writer");
    }
}

#[cfg(test)]
pub(crate) fn test_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}
