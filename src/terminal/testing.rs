//! In-memory shell doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::auth::Credential;
use super::error::TerminalError;
use super::shell::{ConnectTarget, OutputPipe, ShellConnector, ShellIo, ShellWriter};

enum Mode {
    Succeed,
    Fail(String),
    ChannelRefused(String),
    Hang,
}

/// Connector that opens fake shells and remembers each one.
pub(crate) struct MockConnector {
    mode: Mode,
    delay: Duration,
    shells: Mutex<Vec<MockShell>>,
    targets: Mutex<Vec<ConnectTarget>>,
    credentials: Mutex<Vec<Credential>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::with_mode(Mode::Succeed)
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self::with_mode(Mode::Fail(reason.to_string()))
    }

    /// Transport and authentication succeed but the shell channel is refused.
    pub(crate) fn channel_refused(reason: &str) -> Self {
        Self::with_mode(Mode::ChannelRefused(reason.to_string()))
    }

    /// Never completes, so only the caller's deadline ends the attempt.
    pub(crate) fn hanging() -> Self {
        Self::with_mode(Mode::Hang)
    }

    /// Succeeds after sleeping, to widen race windows.
    pub(crate) fn delayed(delay: Duration) -> Self {
        let mut connector = Self::new();
        connector.delay = delay;
        connector
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            delay: Duration::ZERO,
            shells: Mutex::new(Vec::new()),
            targets: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.shells.lock().unwrap().len()
    }

    pub(crate) fn shell(&self, index: usize) -> MockShell {
        self.shells.lock().unwrap()[index].clone()
    }

    pub(crate) fn attempts(&self) -> Vec<ConnectTarget> {
        self.targets.lock().unwrap().clone()
    }

    pub(crate) fn credentials(&self) -> Vec<Credential> {
        self.credentials.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellConnector for MockConnector {
    async fn open(
        &self,
        target: &ConnectTarget,
        credential: &Credential,
    ) -> Result<ShellIo, TerminalError> {
        self.targets.lock().unwrap().push(target.clone());
        self.credentials.lock().unwrap().push(credential.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.mode {
            Mode::Succeed => {
                let shell = MockShell::new();
                self.shells.lock().unwrap().push(shell.clone());
                Ok(ShellIo {
                    writer: Box::new(shell.clone()),
                    output: shell.pipe(),
                })
            }
            Mode::Fail(reason) => Err(TerminalError::Handshake {
                target: target.to_string(),
                reason: reason.clone(),
            }),
            Mode::ChannelRefused(reason) => Err(TerminalError::Channel(reason.clone())),
            Mode::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
struct ShellState {
    written: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<(u32, u32)>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
    stalled: AtomicBool,
}

/// Fake PTY shell. Clones share state, so tests keep a handle after the
/// connection takes ownership of the writer.
#[derive(Clone)]
pub(crate) struct MockShell {
    state: Arc<ShellState>,
    pipe: Arc<OutputPipe>,
}

impl MockShell {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(ShellState::default()),
            pipe: Arc::new(OutputPipe::new()),
        }
    }

    pub(crate) fn pipe(&self) -> Arc<OutputPipe> {
        self.pipe.clone()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.written.lock().unwrap().clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(u32, u32)> {
        self.state.resizes.lock().unwrap().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub(crate) fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Writes and resizes never complete, like a remote end that stopped
    /// reading its input while the transport stays up.
    pub(crate) fn stall(&self) {
        self.state.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShellWriter for MockShell {
    async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.state.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(TerminalError::Channel("broken pipe".into()));
        }
        self.state.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), TerminalError> {
        if self.state.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.state.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn close(&self) -> Result<(), TerminalError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.pipe.close();
        Ok(())
    }
}
