//! Fan-out of lines to registered connections.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    connection::ConnectionId,
    error::DeliveryError,
    protocol::{departure_notice, join_notice, relayed_chat},
    registry::Registry,
};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Queue `message` for every registered connection except `exclude`.
    ///
    /// Deliveries are independent: a full or closed outbox drops the line
    /// for that peer only. Nothing here waits on a peer.
    pub async fn broadcast(&self, message: &str, exclude: Option<ConnectionId>) -> BroadcastReport {
        let targets = self.registry.snapshot().await;
        let line: Arc<str> = Arc::from(message);
        let mut report = BroadcastReport::default();

        for (nickname, connection) in targets {
            if Some(connection.id()) == exclude {
                continue;
            }

            match connection.deliver(Arc::clone(&line)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    report.dropped += 1;
                    warn!(%nickname, peer = %connection.peer(), "client is not keeping up; dropping message");
                }
                Err(DeliveryError::Closed) => {
                    report.dropped += 1;
                    debug!(%nickname, peer = %connection.peer(), "client writer already closed");
                }
            }
        }

        report
    }

    pub async fn announce_join(&self, nickname: &str, subject: ConnectionId) -> BroadcastReport {
        self.broadcast(&join_notice(nickname), Some(subject)).await
    }

    pub async fn announce_departure(&self, nickname: &str, subject: ConnectionId) -> BroadcastReport {
        self.broadcast(&departure_notice(nickname), Some(subject))
            .await
    }

    pub async fn relay_chat(&self, nickname: &str, text: &str, sender: ConnectionId) -> BroadcastReport {
        self.broadcast(&relayed_chat(nickname, text), Some(sender))
            .await
    }
}
