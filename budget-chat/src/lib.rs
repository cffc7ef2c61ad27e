//! Line-based multi-user chat relay over TCP.
//!
//! Clients connect, pick a unique name, and every line they send afterwards
//! is relayed to everyone else in the room. Each module has one job:
//!
//! - [`name`] decides whether a requested name is acceptable.
//! - [`registry`] owns the set of present members behind a readers-writer lock.
//! - [`dispatch`] fans a line out to every member but one.
//! - [`session`] drives a single connection through handshake, chat, and exit.
//! - [`server`] accepts TCP connections and spawns a session for each.
//! - [`protocol`] renders server lines and reads newline-delimited input.
//! - [`cli`] and [`client`] back the `budget-chat` binary.

pub mod cli;
pub mod client;
pub mod dispatch;
pub mod name;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
