//! Session id to remote shell connection map.
//!
//! The registry holds at most one [`RemoteShellConnection`] per session.
//!
//! # Concurrency
//!
//! - Lookups and pass-through I/O go straight to the `DashMap` and never wait
//!   on another session.
//! - `create` and `close` for the same session are serialised by a
//!   per-session async lock, so concurrent creates cannot leave two
//!   connections behind and a slow handshake only stalls its own session.
//! - The reaper collects victims while iterating the map, then removes and
//!   disconnects them concurrently outside any map guard, so a victim whose
//!   channel is slow to close does not hold up the others.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth::Credential;
use super::connection::{ConnectionSettings, RemoteShellConnection};
use super::error::TerminalError;
use super::shell::{ConnectTarget, ShellConnector};
use super::types::{ConnectionStatus, StatusKind};

/// Everything `create` needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub target: ConnectTarget,
    pub credential: Credential,
}

pub struct ConnectionRegistry {
    connector: Arc<dyn ShellConnector>,
    settings: ConnectionSettings,
    connections: DashMap<String, Arc<RemoteShellConnection>>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    reaper_token: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn ShellConnector>, settings: ConnectionSettings) -> Self {
        Self {
            connector,
            settings,
            connections: DashMap::new(),
            session_locks: DashMap::new(),
            reaper_token: CancellationToken::new(),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    // Drop the lock entry once nobody else is holding or waiting on it.
    fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.session_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Open a connection for `session_id`, replacing any existing one.
    ///
    /// The previous connection is disconnected before the new handshake starts.
    /// Nothing is registered when the handshake fails.
    pub async fn create(
        &self,
        session_id: &str,
        params: ConnectParams,
    ) -> Result<Arc<RemoteShellConnection>, TerminalError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;

            if let Some((_, previous)) = self.connections.remove(session_id) {
                info!(
                    "Replacing SSH connection {} for session {}",
                    previous.target(),
                    session_id
                );
                previous.disconnect().await;
            }

            match RemoteShellConnection::connect(
                params.target,
                &params.credential,
                self.connector.as_ref(),
                self.settings,
            )
            .await
            {
                Ok(connection) => {
                    let connection = Arc::new(connection);
                    self.connections
                        .insert(session_id.to_string(), connection.clone());
                    info!("Created SSH connection for session: {}", session_id);
                    Ok(connection)
                }
                Err(e) => {
                    warn!("SSH connection for session {} failed: {}", session_id, e);
                    Err(e)
                }
            }
        };
        self.release_session_lock(session_id, lock);
        result
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<RemoteShellConnection>> {
        self.connections
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    fn active(&self, session_id: &str) -> Option<Arc<RemoteShellConnection>> {
        self.get(session_id).filter(|conn| conn.is_active())
    }

    /// Forward input. False when the session has no active connection.
    pub async fn send_input(&self, session_id: &str, data: &[u8]) -> bool {
        match self.active(session_id) {
            Some(conn) => conn.send_input(data).await,
            None => false,
        }
    }

    /// Drain ready output. Empty when the session has no active connection.
    pub async fn read_output(&self, session_id: &str) -> Vec<u8> {
        match self.active(session_id) {
            Some(conn) => conn.read_output().await,
            None => Vec::new(),
        }
    }

    pub async fn resize(&self, session_id: &str, cols: u32, rows: u32) -> bool {
        match self.active(session_id) {
            Some(conn) => conn.resize(cols, rows).await,
            None => false,
        }
    }

    /// Disconnect and forget the session's connection. Returns whether one existed.
    pub async fn close(&self, session_id: &str) -> bool {
        let lock = self.session_lock(session_id);
        let removed = {
            let _guard = lock.lock().await;
            self.connections.remove(session_id)
        };
        self.release_session_lock(session_id, lock);

        match removed {
            Some((_, conn)) => {
                conn.disconnect().await;
                info!("Closed SSH connection for session: {}", session_id);
                true
            }
            None => false,
        }
    }

    /// Whether `conn` is still the connection registered for `session_id`.
    pub fn is_current(&self, session_id: &str, conn: &Arc<RemoteShellConnection>) -> bool {
        self.connections
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), conn))
    }

    /// Remove `conn` only if it is still registered for `session_id`, then
    /// disconnect it. A replacement created in the meantime is left alone.
    pub async fn evict(&self, session_id: &str, conn: &Arc<RemoteShellConnection>) -> bool {
        let removed = self
            .connections
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, conn))
            .is_some();
        conn.disconnect().await;
        removed
    }

    /// Point-in-time status for `get-status`.
    pub fn status(&self, session_id: &str) -> Result<ConnectionStatus, TerminalError> {
        match self.get(session_id) {
            Some(conn) => Ok(conn.snapshot()?.to_status()),
            None => Ok(ConnectionStatus::new(
                StatusKind::Disconnected,
                "No active connection",
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Evict every connection whose `is_active` is false. Returns how many.
    pub async fn reap_inactive(&self) -> usize {
        let victims: Vec<(String, Arc<RemoteShellConnection>)> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_active())
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let evictions = victims.iter().map(|(session_id, conn)| async move {
            let evicted = self.evict(session_id, conn).await;
            if evicted {
                info!("Cleaned up inactive SSH connection: {}", session_id);
            }
            evicted
        });

        join_all(evictions)
            .await
            .into_iter()
            .filter(|evicted| *evicted)
            .count()
    }

    /// Run `reap_inactive` every `period` until [`shutdown`](Self::shutdown).
    pub fn start_reaper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let token = self.reaper_token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        debug!("Connection reaper stopped");
                        break;
                    }

                    _ = ticker.tick() => {
                        let reaped = registry.reap_inactive().await;
                        if reaped > 0 {
                            info!("Reaper evicted {} inactive connection(s)", reaped);
                        }
                    }
                }
            }
        })
    }

    /// Stop the reaper and disconnect every connection.
    pub async fn shutdown(&self) {
        self.reaper_token.cancel();

        let session_ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        join_all(session_ids.iter().map(|session_id| self.close(session_id))).await;
        info!(
            "Connection registry shut down ({} connection(s) closed)",
            session_ids.len()
        );
    }
}
