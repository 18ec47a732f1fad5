//! The seam between a [`Credential`](super::Credential) and the russh handle.

use async_trait::async_trait;
use russh::client;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;
use crate::terminal::shell::ConnectTarget;

/// Presents one explicit credential to the server.
///
/// There is no fallback to agents or default key locations.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// `Ok(false)` means the server rejected the credential. `Err` means the
    /// attempt itself failed (unreadable key, transport error) and is reported
    /// as a handshake failure for `target`.
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        target: &ConnectTarget,
    ) -> Result<bool, TerminalError>;

    /// Label used in logs.
    fn name(&self) -> &'static str;
}
