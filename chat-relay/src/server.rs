use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::RelayConfig,
    connection::IdAllocator,
    registry::Registry,
    session::{CloseReason, Session},
};

/// State shared by every session of one server.
#[derive(Debug)]
pub struct RelayState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) ids: IdAllocator,
    pub(crate) config: RelayConfig,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            ids: IdAllocator::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

pub struct Server {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            state: Arc::new(RelayState::new(config)),
        }
    }

    /// Bind the listener named by `config.listen`.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to listen on {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state.registry)
    }

    /// Accept connections until `shutdown` resolves, then close every
    /// session and wait for them to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        let sessions_shutdown = CancellationToken::new();
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(live = sessions.len(), "relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state, &sessions_shutdown, &mut sessions);
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap_session(finished);
                }
            }
        }

        drop(listener);
        sessions_shutdown.cancel();
        drain_sessions(&mut sessions, state.config.shutdown_grace).await;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<RelayState>,
    shutdown: &CancellationToken,
    sessions: &mut JoinSet<CloseReason>,
) {
    match result {
        Ok((stream, peer)) => {
            info!(%peer, "client connected");
            let (reader, writer) = stream.into_split();
            let session = Session::open(
                reader,
                writer,
                peer,
                Arc::clone(state),
                shutdown.child_token(),
            );
            sessions.spawn(session.run());
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn reap_session(finished: Result<CloseReason, JoinError>) {
    match finished {
        Ok(reason) => debug!(?reason, "session finished"),
        Err(err) if err.is_panic() => warn!(error = ?err, "session panicked"),
        Err(err) => debug!(error = ?err, "session cancelled"),
    }
}

async fn drain_sessions(sessions: &mut JoinSet<CloseReason>, grace: Duration) {
    let drained = timeout(grace, async {
        while let Some(finished) = sessions.join_next().await {
            reap_session(finished);
        }
    })
    .await;

    if drained.is_err() {
        warn!(remaining = sessions.len(), "sessions did not close in time; aborting them");
        sessions.abort_all();
        while let Some(finished) = sessions.join_next().await {
            reap_session(finished);
        }
    }
}
