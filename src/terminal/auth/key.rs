//! Private key login for `key_auth` connections.
//!
//! The key comes from the request's `key_path` or the gateway's configured
//! default key. It must be unencrypted: there is nowhere to ask for a
//! passphrase.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;
use crate::terminal::shell::ConnectTarget;

use super::traits::AuthStrategy;

pub struct KeyAuth {
    key_path: PathBuf,
}

impl KeyAuth {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    /// Read the key for a login to `target`.
    fn load_key(&self, target: &ConnectTarget) -> Result<keys::PrivateKey, TerminalError> {
        keys::load_secret_key(&self.key_path, None).map_err(|e| TerminalError::Handshake {
            target: target.to_string(),
            reason: format!(
                "Failed to load private key {} for {}: {}",
                self.key_path.display(),
                target.username,
                e
            ),
        })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        target: &ConnectTarget,
    ) -> Result<bool, TerminalError> {
        let key_pair = self.load_key(target)?;

        // RSA keys sign with the best hash the server supports
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!(
            "Offering key {} to {} (RSA hash {:?})",
            self.key_path.display(),
            target,
            hash_alg
        );

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(target.username.as_str(), key_with_hash)
            .await
            .map_err(|e| TerminalError::Handshake {
                target: target.to_string(),
                reason: format!("Key authentication failed: {}", e),
            })?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
