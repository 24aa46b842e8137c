use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{config::RelayConfig, protocol::DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, env = "CHAT_RELAY_LISTEN", default_value = "0.0.0.0:25565")]
    pub listen: SocketAddr,

    /// Longest line, in bytes, a client may send.
    #[arg(long, env = "CHAT_RELAY_MAX_LINE_LEN", default_value_t = 1024)]
    pub max_line_len: usize,

    /// Lines queued per client before broadcasts to it are dropped.
    #[arg(long, env = "CHAT_RELAY_OUTBOX_CAPACITY", default_value_t = 64)]
    pub outbox_capacity: usize,

    /// Milliseconds to wait for clients to flush during shutdown.
    #[arg(long, env = "CHAT_RELAY_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,
}

impl From<ServerArgs> for RelayConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            listen: args.listen,
            max_line_len: args.max_line_len,
            outbox_capacity: args.outbox_capacity,
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Host name or IP address of the relay.
    pub server_ip: String,

    /// Nickname shown in the local banner.
    pub nickname: String,

    /// Real name sent with the registration.
    pub real_name: String,

    /// Username the relay registers and shows to other clients.
    pub username: String,

    /// Port the relay listens on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_relay_defaults() {
        let cli = Cli::try_parse_from(["chat-relay", "server"]).expect("parse server");
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = RelayConfig::from(args);
        let defaults = RelayConfig::default();

        assert_eq!(config.listen, defaults.listen);
        assert_eq!(config.max_line_len, defaults.max_line_len);
        assert_eq!(config.outbox_capacity, defaults.outbox_capacity);
        assert_eq!(config.shutdown_grace, defaults.shutdown_grace);
    }

    #[test]
    fn client_takes_positional_arguments() {
        let cli = Cli::try_parse_from([
            "chat-relay",
            "client",
            "127.0.0.1",
            "ally",
            "Alice Example",
            "alice",
            "--port",
            "4000",
        ])
        .expect("parse client");
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };

        assert_eq!(args.server_ip, "127.0.0.1");
        assert_eq!(args.nickname, "ally");
        assert_eq!(args.real_name, "Alice Example");
        assert_eq!(args.username, "alice");
        assert_eq!(args.port, 4000);
    }

    #[test]
    fn client_requires_all_four_arguments() {
        assert!(Cli::try_parse_from(["chat-relay", "client", "127.0.0.1", "ally"]).is_err());
    }
}
