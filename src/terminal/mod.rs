//! SSH terminal gateway: browser sessions multiplexed onto remote shells.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Wire events exchanged with the browser
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy and handshake failure classification
//! - `session`: russh client handler
//! - `auth`: Explicit-credential authentication strategies
//! - `shell`: Channel I/O seams shared by the real and in-memory transports
//! - `client`: russh connector (handshake, PTY shell, output pump)
//! - `connection`: One live remote shell with liveness policy
//! - `registry`: Session id to connection map with the background reaper
//! - `relay`: Per-session output forwarding task
//! - `audit`: Advisory dangerous-command detection
//! - `login`: Time-limited login flags consulted on socket open
//! - `gateway`: Inbound event validation and dispatch
//! - `server`: poem routes and the WebSocket session loop

pub mod audit;
pub mod auth;
pub(crate) mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod login;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod shell;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::RusshConnector;
pub use config::GatewayConfig;
pub use connection::{ConnectionSettings, RemoteShellConnection};
pub use error::{ErrorKind, TerminalError};
pub use gateway::SessionGateway;
pub use login::{LoginRegistry, SessionAuthenticator};
pub use registry::ConnectionRegistry;
pub use server::{AppState, app};
