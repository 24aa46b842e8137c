use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::protocol::{DEFAULT_MAX_LINE_LEN, DEFAULT_PORT};

/// Runtime settings for a relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Longest inbound line accepted before the connection is closed.
    pub max_line_len: usize,
    /// Lines that may queue for one client before broadcasts to it are dropped.
    pub outbox_capacity: usize,
    /// How long shutdown waits for sessions and writers to flush.
    pub shutdown_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            outbox_capacity: 64,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl RelayConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }
}
