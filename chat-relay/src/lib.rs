//! Line-based TCP chat relay.
//!
//! Clients register with an IRC-style `USER` command and every line they
//! send afterwards is relayed to all other registered clients. Modules:
//!
//! - [`server`] owns the listener, spawns one session task per connection
//!   and tracks them for shutdown.
//! - [`session`] runs a connection's state machine: registration, relay,
//!   and the close sequence.
//! - [`registry`] is the only shared mutable state: the nickname to
//!   connection mapping, guarded by a single lock.
//! - [`broadcast`] fans one line out to a registry snapshot without ever
//!   waiting on a slow peer.
//! - [`connection`] holds the per-connection outbox handle and writer task.
//! - [`protocol`] defines framing, commands, replies and notices.
//! - [`cli`], [`config`] and [`client`] are the command-line front end and
//!   the companion terminal client.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
