//! russh client handler used for every remote shell connection.
//!
//! # Host keys
//!
//! `SshClientHandler` accepts every server key, the equivalent of
//! `StrictHostKeyChecking=no`. The browser user picks the target host at
//! runtime, so there is no known_hosts file to verify against. The accepted
//! key fingerprint is logged so it can be audited afterwards.

use russh::client;
use russh::keys::{self, HashAlg};
use tracing::debug;

/// Client handler for russh that accepts all host keys.
pub struct SshClientHandler {
    target: String,
}

impl SshClientHandler {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting host key {} for {}",
            server_public_key.fingerprint(HashAlg::Sha256),
            self.target
        );
        Ok(true)
    }
}
