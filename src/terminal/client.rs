//! SSH transport and PTY shell setup over russh.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: keepalive and compression settings. No
//!    inactivity timeout: idle policy belongs to the registry.
//! 2. **Connection Establishment**: TCP connect and key exchange.
//! 3. **Authentication**: exactly one explicit credential, password or key.
//! 4. **Shell**: open a session channel, request a PTY, start the login shell.
//! 5. **Pump**: a background task drains the channel read half into an
//!    [`OutputPipe`] until the remote end closes.
//!
//! The overall handshake deadline is applied by the caller. Failures after the
//! transport is up disconnect it before returning, so a failed attempt never
//! leaves a half-open session behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, client};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::auth::Credential;
use super::error::TerminalError;
use super::session::SshClientHandler;
use super::shell::{ConnectTarget, OutputPipe, ShellConnector, ShellIo, ShellWriter};

/// Initial PTY width before the browser reports its size.
pub(crate) const DEFAULT_COLS: u32 = 80;

/// Initial PTY height before the browser reports its size.
pub(crate) const DEFAULT_ROWS: u32 = 24;

/// Build russh client configuration.
///
/// - Inactivity timeout disabled, the session lives until the registry ends it
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` (ZLIB if enabled, NONE otherwise)
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Opens PTY shells over real SSH connections.
pub struct RusshConnector {
    config: Arc<client::Config>,
    term: String,
}

impl RusshConnector {
    pub fn new(term: impl Into<String>, compress: bool) -> Self {
        Self {
            config: build_client_config(compress),
            term: term.into(),
        }
    }

    async fn handshake(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
    ) -> Result<client::Handle<SshClientHandler>, TerminalError> {
        let handler = SshClientHandler::new(target.to_string());
        let mut handle = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| TerminalError::Handshake {
            target: target.to_string(),
            reason: format!("Failed to connect: {}", e),
        })?;

        let strategy = credential.strategy();
        debug!("Authenticating {} with {}", target, strategy.name());

        let authenticated = match strategy.authenticate(&mut handle, target).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                release(&handle).await;
                return Err(e);
            }
        };

        if !authenticated {
            release(&handle).await;
            return Err(TerminalError::AuthenticationRejected {
                username: target.username.clone(),
            });
        }

        Ok(handle)
    }

    /// Shell setup failures are reported as handshake failures: from the
    /// browser's point of view the connection never came up.
    async fn open_shell(
        &self,
        target: &ConnectTarget,
        handle: &client::Handle<SshClientHandler>,
    ) -> Result<russh::Channel<client::Msg>, TerminalError> {
        let refused = |step: &str, e: russh::Error| TerminalError::Handshake {
            target: target.to_string(),
            reason: format!("{} failed: {}", step, e),
        };

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| refused("Channel open", e))?;

        channel
            .request_pty(false, &self.term, DEFAULT_COLS, DEFAULT_ROWS, 0, 0, &[])
            .await
            .map_err(|e| refused("PTY request", e))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| refused("Shell request", e))?;

        Ok(channel)
    }
}

#[async_trait]
impl ShellConnector for RusshConnector {
    async fn open(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
    ) -> Result<ShellIo, TerminalError> {
        let handle = self.handshake(target, credential).await?;

        let channel = match self.open_shell(target, &handle).await {
            Ok(channel) => channel,
            Err(e) => {
                release(&handle).await;
                return Err(e);
            }
        };

        let (read_half, write_half) = channel.split();
        let output = Arc::new(OutputPipe::new());
        let pump = spawn_pump(read_half, output.clone(), target.to_string());

        info!("Interactive shell opened for {}", target);

        Ok(ShellIo {
            writer: Box::new(ChannelWriter {
                write_half,
                handle,
                pump,
            }),
            output,
        })
    }
}

async fn release(handle: &client::Handle<SshClientHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("Ignoring disconnect error: {}", e);
    }
}

/// Drain the channel into the pipe until the remote side goes away.
fn spawn_pump(
    mut read_half: ChannelReadHalf,
    output: Arc<OutputPipe>,
    target: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_half.wait().await {
                Some(ChannelMsg::Data { data }) => output.push_stdout(&data),
                // ext == 1 is stderr in SSH protocol
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    output.push_stderr(&data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Shell on {} exited with status {}", target, exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
        output.close();
        debug!("Channel reader for {} finished", target);
    })
}

/// Write half of a PTY channel plus the transport that carries it.
pub struct ChannelWriter {
    write_half: ChannelWriteHalf<client::Msg>,
    handle: client::Handle<SshClientHandler>,
    pump: JoinHandle<()>,
}

#[async_trait]
impl ShellWriter for ChannelWriter {
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.write_half
            .data(data)
            .await
            .map_err(|e| TerminalError::Channel(format!("Failed to write to shell: {}", e)))
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError> {
        self.write_half
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| TerminalError::Channel(format!("Window change failed: {}", e)))
    }

    async fn close(&self) -> Result<(), TerminalError> {
        self.pump.abort();
        let channel_result = self.write_half.close().await;
        let transport_result = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await;

        if let Err(e) = channel_result {
            warn!("Failed to close shell channel: {}", e);
        }
        transport_result
            .map_err(|e| TerminalError::Channel(format!("Failed to close transport: {}", e)))
    }
}
