//! One authenticated SSH transport plus one interactive PTY shell.
//!
//! A `RemoteShellConnection` only exists after a successful handshake and shell
//! open, so every instance starts connected. From then on:
//!
//! - channel I/O (`send_input`, `read_output`, `resize`) is serialised by a
//!   per-connection async lock shared by the relay and the gateway;
//! - every write, resize and close runs under the `io_timeout` deadline, and a
//!   missed deadline counts as an I/O failure;
//! - any I/O failure tears the connection down;
//! - teardown never waits for the I/O lock, so closing a connection whose
//!   remote end stopped reading is immediate and releases the stalled write;
//! - `is_active` is the single liveness check used by the registry, the relay
//!   and the reaper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::Credential;
use super::error::TerminalError;
use super::shell::{ConnectTarget, OutputPipe, ShellConnector, ShellWriter};
use super::types::ConnectionSnapshot;

/// Timing policy applied to a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
}

pub struct RemoteShellConnection {
    target: ConnectTarget,
    auth_method: &'static str,
    idle_timeout: Duration,
    io_timeout: Duration,
    io_lock: Mutex<()>,
    writer: Box<dyn ShellWriter>,
    output: Arc<OutputPipe>,
    connected: AtomicBool,
    closing: CancellationToken,
    last_activity: StdMutex<DateTime<Utc>>,
}

impl RemoteShellConnection {
    /// Handshake, authenticate and open a PTY shell within `connect_timeout`.
    ///
    /// On failure nothing is kept: the connector has already released whatever
    /// it acquired, and a timed-out attempt is dropped mid-flight. Every
    /// failure here is a connection failure, including a channel refused
    /// after authentication.
    pub async fn connect(
        target: ConnectTarget,
        credential: &Credential,
        connector: &dyn ShellConnector,
        settings: ConnectionSettings,
    ) -> Result<Self, TerminalError> {
        info!(
            "Opening SSH connection to {} using {} authentication",
            target,
            credential.method()
        );

        let io = tokio::time::timeout(
            settings.connect_timeout,
            connector.open(&target, credential),
        )
        .await
        .map_err(|_| TerminalError::HandshakeTimeout {
            target: target.to_string(),
            secs: settings.connect_timeout.as_secs(),
        })?
        .map_err(|e| match e {
            TerminalError::Channel(reason) | TerminalError::Status(reason) => {
                TerminalError::Handshake {
                    target: target.to_string(),
                    reason,
                }
            }
            other => other,
        })?;

        info!("SSH connection established to {}", target);

        Ok(Self {
            target,
            auth_method: credential.method(),
            idle_timeout: settings.idle_timeout,
            io_timeout: settings.io_timeout,
            io_lock: Mutex::new(()),
            writer: io.writer,
            output: io.output,
            connected: AtomicBool::new(true),
            closing: CancellationToken::new(),
            last_activity: StdMutex::new(Utc::now()),
        })
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    // Waits for the I/O lock unless the connection is torn down meanwhile.
    async fn lock_io(&self) -> Option<MutexGuard<'_, ()>> {
        tokio::select! {
            _ = self.closing.cancelled() => None,
            guard = self.io_lock.lock() => Some(guard).filter(|_| self.is_connected()),
        }
    }

    // Run one channel operation under the deadline. `None` means teardown won
    // the race and the operation was abandoned.
    async fn bounded<F>(&self, op: F) -> Option<Result<(), TerminalError>>
    where
        F: std::future::Future<Output = Result<(), TerminalError>>,
    {
        let result = tokio::select! {
            _ = self.closing.cancelled() => return None,
            result = tokio::time::timeout(self.io_timeout, op) => result,
        };

        Some(result.unwrap_or_else(|_| {
            Err(TerminalError::Channel(format!(
                "no progress within {}s",
                self.io_timeout.as_secs()
            )))
        }))
    }

    /// Write keystrokes to the shell. Returns false when not connected or when
    /// the write fails or stalls, in which case the connection is torn down.
    pub async fn send_input(&self, data: &[u8]) -> bool {
        let result = {
            let Some(_io) = self.lock_io().await else {
                return false;
            };
            self.bounded(self.writer.write(data)).await
        };

        match result {
            Some(Ok(())) => {
                self.touch();
                true
            }
            Some(Err(e)) => {
                warn!("Input to {} failed, closing connection: {}", self.target, e);
                self.teardown().await;
                false
            }
            None => false,
        }
    }

    /// Drain whatever output is ready without waiting for more.
    ///
    /// A channel that closed with nothing left to read tears the connection down.
    pub async fn read_output(&self) -> Vec<u8> {
        let data = {
            let Some(_io) = self.lock_io().await else {
                return Vec::new();
            };
            self.output.take_available()
        };

        if !data.is_empty() {
            self.touch();
        } else if !self.output.is_open() {
            debug!("Channel to {} closed by remote end", self.target);
            self.teardown().await;
        }
        data
    }

    /// Change the PTY window size. Zero dimensions are rejected.
    pub async fn resize(&self, cols: u32, rows: u32) -> bool {
        if cols == 0 || rows == 0 {
            debug!("Ignoring resize to {}x{} for {}", cols, rows, self.target);
            return false;
        }

        let result = {
            let Some(_io) = self.lock_io().await else {
                return false;
            };
            self.bounded(self.writer.resize(cols, rows)).await
        };

        match result {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Resize on {} failed, closing connection: {}", self.target, e);
                self.teardown().await;
                false
            }
            None => false,
        }
    }

    /// Connected, channel still open and not idle past the threshold.
    pub fn is_active(&self) -> bool {
        if !self.is_connected() || !self.output.is_open() {
            return false;
        }
        self.idle_for() <= self.idle_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Time since the last send or non-empty read.
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Close the channel and then the transport. Safe to call more than once
    /// and while another task is blocked on the channel.
    pub async fn disconnect(&self) {
        if self.teardown().await {
            info!("SSH connection to {} closed", self.target);
        }
    }

    /// Point-in-time view for `connection-status` events.
    pub fn snapshot(&self) -> Result<ConnectionSnapshot, TerminalError> {
        let last_activity = *self
            .last_activity
            .lock()
            .map_err(|_| TerminalError::Status("activity clock unavailable".into()))?;

        Ok(ConnectionSnapshot {
            active: self.is_active(),
            host: self.target.host.clone(),
            port: self.target.port,
            username: self.target.username.clone(),
            auth_method: self.auth_method,
            last_activity,
        })
    }

    fn touch(&self) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Utc::now();
    }

    // Only the first caller closes the writer. Returns whether this call did.
    async fn teardown(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.closing.cancel();
        self.output.close();
        self.output.clear();

        match tokio::time::timeout(self.io_timeout, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error while closing {}: {}", self.target, e),
            Err(_) => warn!(
                "Closing {} did not finish within {}s",
                self.target,
                self.io_timeout.as_secs()
            ),
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = at;
        }
    }
}

impl std::fmt::Debug for RemoteShellConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteShellConnection")
            .field("target", &self.target)
            .field("auth_method", &self.auth_method)
            .field("connected", &self.is_connected())
            .finish()
    }
}
