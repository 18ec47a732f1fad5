//! Password login.

use async_trait::async_trait;
use russh::client;

use crate::terminal::error::TerminalError;
use crate::terminal::session::SshClientHandler;
use crate::terminal::shell::ConnectTarget;

use super::traits::AuthStrategy;

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        target: &ConnectTarget,
    ) -> Result<bool, TerminalError> {
        let result = handle
            .authenticate_password(target.username.as_str(), &self.password)
            .await
            .map_err(|e| TerminalError::Handshake {
                target: target.to_string(),
                reason: format!("Password authentication failed: {}", e),
            })?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
