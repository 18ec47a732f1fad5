//! Channel I/O seams for interactive remote shells.
//!
//! A remote shell is split in two halves:
//!
//! - `ShellWriter`: the write side (keystrokes, PTY resize, close). Implemented
//!   over a russh channel write half in `client`, and by in-memory doubles in tests.
//! - `OutputPipe`: the read side. A background pump appends whatever the remote
//!   end sends, and readers drain it without ever waiting on the network.
//!
//! `ShellConnector` produces both halves from a target and a credential. The
//! registry only ever talks to this trait, so the handshake can be swapped
//! out in tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::warn;

use super::auth::Credential;
use super::error::TerminalError;

/// Pending output kept per stream before the oldest bytes are discarded.
pub const MAX_PENDING_OUTPUT: usize = 1024 * 1024;

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Output buffer for collecting shell output
#[derive(Debug, Default)]
pub struct OutputBuffer {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Read side of a shell channel, filled by a background pump.
#[derive(Debug)]
pub struct OutputPipe {
    buffer: Mutex<OutputBuffer>,
    open: AtomicBool,
}

impl OutputPipe {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(OutputBuffer::default()),
            open: AtomicBool::new(true),
        }
    }

    pub fn push_stdout(&self, data: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        append_bounded(&mut buffer.stdout, data, "stdout");
    }

    pub fn push_stderr(&self, data: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        append_bounded(&mut buffer.stderr, data, "stderr");
    }

    /// Drain whatever is ready: stdout if it has bytes, otherwise stderr.
    pub fn take_available(&self) -> Vec<u8> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if !buffer.stdout.is_empty() {
            return std::mem::take(&mut buffer.stdout);
        }
        std::mem::take(&mut buffer.stderr)
    }

    /// Mark the remote channel as gone. Buffered bytes stay readable.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Drop buffered bytes.
    pub fn clear(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.stdout.clear();
        buffer.stderr.clear();
    }
}

impl Default for OutputPipe {
    fn default() -> Self {
        Self::new()
    }
}

fn append_bounded(target: &mut Vec<u8>, data: &[u8], stream: &str) {
    target.extend_from_slice(data);
    if target.len() > MAX_PENDING_OUTPUT {
        let excess = target.len() - MAX_PENDING_OUTPUT;
        target.drain(..excess);
        warn!(
            "Discarded {} bytes of unread {} output (reader is not keeping up)",
            excess, stream
        );
    }
}

/// Write side of an interactive shell channel.
#[async_trait]
pub trait ShellWriter: Send + Sync {
    /// Send raw bytes (keystrokes, pasted text, escape sequences).
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError>;

    /// Request a PTY window change.
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError>;

    /// Close the channel and then the transport underneath it.
    async fn close(&self) -> Result<(), TerminalError>;
}

/// Both halves of a freshly opened shell.
pub struct ShellIo {
    pub writer: Box<dyn ShellWriter>,
    pub output: Arc<OutputPipe>,
}

/// Opens authenticated interactive shells.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Handshake, authenticate and open a PTY shell.
    ///
    /// Implementations must release everything they acquired when they fail.
    async fn open(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
    ) -> Result<ShellIo, TerminalError>;
}
