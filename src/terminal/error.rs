//! Error taxonomy for the terminal gateway.
//!
//! Every failure inside the gateway is eventually reported to the browser as an
//! `error` event whose `type` is one of the [`ErrorKind`] values:
//!
//! 1. **validation**: malformed or missing request fields. Rejected before the
//!    registry is touched and never retried.
//! 2. **connection**: handshake or authentication failure, or an action that
//!    needs a live connection when there is none.
//! 3. **command**: mid-session channel failure. The connection is torn down.
//! 4. **status**: a status snapshot could not be produced.
//!
//! # Handshake classification
//!
//! Transport errors from the SSH layer arrive as free-form text. They are
//! classified with the same keyword approach used for retry decisions in the
//! SSH client layer, except that nothing is retried here: the classification
//! only selects the message shown to the user. Authentication patterns take
//! precedence over network patterns so a bad password is never reported as a
//! network problem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level error category carried in the `type` field of `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Connection,
    Command,
    Status,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Command => write!(f, "command"),
            ErrorKind::Status => write!(f, "status"),
        }
    }
}

/// Errors produced by the gateway, its connections and their transports.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("{0}")]
    Validation(String),

    #[error("SSH handshake with {target} failed: {reason}")]
    Handshake { target: String, reason: String },

    #[error("SSH authentication as {username} was rejected")]
    AuthenticationRejected { username: String },

    #[error("SSH handshake with {target} timed out after {secs}s")]
    HandshakeTimeout { target: String, secs: u64 },

    #[error("No active SSH connection")]
    NotConnected,

    #[error("SSH channel error: {0}")]
    Channel(String),

    #[error("Status unavailable: {0}")]
    Status(String),
}

impl TerminalError {
    /// Category reported to the browser.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TerminalError::Validation(_) => ErrorKind::Validation,
            TerminalError::Handshake { .. }
            | TerminalError::AuthenticationRejected { .. }
            | TerminalError::HandshakeTimeout { .. }
            | TerminalError::NotConnected => ErrorKind::Connection,
            TerminalError::Channel(_) => ErrorKind::Command,
            TerminalError::Status(_) => ErrorKind::Status,
        }
    }

    /// Message safe to show to the browser.
    ///
    /// Handshake details can leak account or network information, so they are
    /// replaced by a classified generic message. Other variants are shown as is.
    pub fn user_message(&self) -> String {
        match self {
            TerminalError::AuthenticationRejected { .. } => {
                ConnectFailure::Authentication.user_message().to_string()
            }
            TerminalError::HandshakeTimeout { .. } => {
                ConnectFailure::Timeout.user_message().to_string()
            }
            TerminalError::Handshake { reason, .. } => {
                classify_connect_failure(reason).user_message().to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Classified reason for a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Authentication,
    Timeout,
    Network,
    Unknown,
}

impl ConnectFailure {
    pub fn user_message(self) -> &'static str {
        match self {
            ConnectFailure::Authentication => {
                "Authentication failed. Please check your username and credentials."
            }
            ConnectFailure::Timeout => "Connection timed out. The server may be unreachable.",
            ConnectFailure::Network => "Connection failed. Please verify the host and port.",
            ConnectFailure::Unknown => {
                "Failed to establish SSH connection. Please check your credentials."
            }
        }
    }
}

/// Authentication error patterns.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "rejected",
    "failed to load private key",
];

/// Timeout error patterns.
const TIMEOUT_ERRORS: &[&str] = &["timed out", "timeout"];

/// Network error patterns.
const NETWORK_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "no such host",
    "dns",
    "failed to connect",
    "broken pipe",
];

/// Classify a handshake error message.
///
/// Matching is case-insensitive. Authentication patterns are checked first,
/// then timeouts, then network failures.
pub fn classify_connect_failure(error: &str) -> ConnectFailure {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return ConnectFailure::Authentication;
    }

    if TIMEOUT_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return ConnectFailure::Timeout;
    }

    if NETWORK_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return ConnectFailure::Network;
    }

    ConnectFailure::Unknown
}
