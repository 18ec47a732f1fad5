//! Per-session task that forwards shell output to the browser.
//!
//! The relay polls its connection on a fixed cadence and pushes every
//! non-empty read as one `terminal-output` event. It stops silently as soon as
//! the connection is no longer the one registered for the session (explicit
//! close or replacement). When it finds the connection dead on its own, it
//! evicts it and reports `SSH connection lost`.
//!
//! The outbound queue is bounded per session, so a slow browser only holds up
//! its own relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::connection::RemoteShellConnection;
use super::error::ErrorKind;
use super::registry::ConnectionRegistry;
use super::types::ServerEvent;

pub const CONNECTION_LOST_MESSAGE: &str = "SSH connection lost";

/// Decodes a byte stream as UTF-8 across chunk boundaries.
///
/// A multi-byte character split between two reads is held back until the
/// rest arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let keep = incomplete_tail(&self.pending);
        let split = self.pending.len() - keep;
        let tail = self.pending.split_off(split);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Whatever is still held back, decoded lossily.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Length of a trailing, not yet complete UTF-8 sequence.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let byte = bytes[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        let available = bytes.len() - i;
        return if available < needed { available } else { 0 };
    }
    0
}

/// Start relaying output from `conn` to `outbound`.
pub fn spawn_relay(
    registry: Arc<ConnectionRegistry>,
    session_id: String,
    conn: Arc<RemoteShellConnection>,
    outbound: mpsc::Sender<ServerEvent>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut decoder = Utf8Carry::default();

        debug!("Output relay started for session {}", session_id);

        loop {
            ticker.tick().await;

            if !registry.is_current(&session_id, &conn) {
                debug!("Output relay for session {} detached", session_id);
                break;
            }

            let data = conn.read_output().await;
            if !data.is_empty() {
                let text = decoder.decode(&data);
                if text.is_empty() {
                    continue;
                }
                if outbound
                    .send(ServerEvent::TerminalOutput { data: text })
                    .await
                    .is_err()
                {
                    debug!("Outbound queue for session {} closed", session_id);
                    break;
                }
                continue;
            }

            if conn.is_active() {
                continue;
            }

            if registry.evict(&session_id, &conn).await {
                info!(
                    "SSH connection {} for session {} ended",
                    conn.target(),
                    session_id
                );
                let rest = decoder.finish();
                if !rest.is_empty() {
                    let _ = outbound
                        .send(ServerEvent::TerminalOutput { data: rest })
                        .await;
                }
                let _ = outbound
                    .send(ServerEvent::error(
                        ErrorKind::Connection,
                        CONNECTION_LOST_MESSAGE,
                    ))
                    .await;
            }
            break;
        }

        debug!("Output relay stopped for session {}", session_id);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::auth::Credential;
    use crate::terminal::connection::ConnectionSettings;
    use crate::terminal::registry::ConnectParams;
    use crate::terminal::shell::ConnectTarget;
    use crate::terminal::testing::MockConnector;

    mod utf8_carry {
        use super::*;

        #[test]
        fn test_ascii_passes_through() {
            let mut carry = Utf8Carry::default();
            assert_eq!(carry.decode(b"$ ls\r\n"), "$ ls\r\n");
            assert!(carry.finish().is_empty());
        }

        #[test]
        fn test_split_multibyte_character() {
            let bytes = "caf\u{e9} \u{1F600}".as_bytes();
            let mut carry = Utf8Carry::default();

            // Split inside the 4-byte emoji.
            let cut = bytes.len() - 2;
            let first = carry.decode(&bytes[..cut]);
            let second = carry.decode(&bytes[cut..]);

            assert_eq!(first, "caf\u{e9} ");
            assert_eq!(second, "\u{1F600}");
        }

        #[test]
        fn test_byte_at_a_time() {
            let text = "\u{65e5}\u{672c}\u{8a9e}";
            let mut carry = Utf8Carry::default();
            let decoded: String = text.as_bytes().iter().map(|b| carry.decode(&[*b])).collect();
            assert_eq!(decoded, text);
        }

        #[test]
        fn test_invalid_bytes_are_replaced() {
            let mut carry = Utf8Carry::default();
            assert_eq!(carry.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
        }

        #[test]
        fn test_finish_flushes_truncated_sequence() {
            let mut carry = Utf8Carry::default();
            assert_eq!(carry.decode(&[b'x', 0xE2, 0x82]), "x");
            assert_eq!(carry.finish(), "\u{FFFD}");
        }
    }

    mod relay_task {
        use super::*;

        const POLL: Duration = Duration::from_millis(5);

        async fn setup() -> (
            Arc<MockConnector>,
            Arc<ConnectionRegistry>,
            Arc<RemoteShellConnection>,
        ) {
            let connector = Arc::new(MockConnector::new());
            let registry = Arc::new(ConnectionRegistry::new(
                connector.clone(),
                ConnectionSettings {
                    connect_timeout: Duration::from_secs(1),
                    idle_timeout: Duration::from_secs(60),
                    io_timeout: Duration::from_secs(1),
                },
            ));
            let conn = registry
                .create(
                    "s1",
                    ConnectParams {
                        target: ConnectTarget::new("h", 22, "u"),
                        credential: Credential::Password("pw".into()),
                    },
                )
                .await
                .unwrap();
            (connector, registry, conn)
        }

        async fn next(rx: &mut mpsc::Receiver<ServerEvent>) -> Option<ServerEvent> {
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .ok()
                .flatten()
        }

        #[tokio::test]
        async fn test_output_is_forwarded_in_order() {
            let (connector, registry, conn) = setup().await;
            let (tx, mut rx) = mpsc::channel(16);
            let pipe = connector.shell(0).pipe();
            pipe.push_stdout(b"first ");

            let relay = spawn_relay(registry.clone(), "s1".into(), conn, tx, POLL);

            let mut received = String::new();
            while received.len() < "first second".len() {
                if received == "first " {
                    pipe.push_stdout(b"second");
                }
                match next(&mut rx).await {
                    Some(ServerEvent::TerminalOutput { data }) => received.push_str(&data),
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            assert_eq!(received, "first second");

            registry.close("s1").await;
            tokio::time::timeout(Duration::from_secs(1), relay)
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn test_explicit_close_stops_silently() {
            let (_connector, registry, conn) = setup().await;
            let (tx, mut rx) = mpsc::channel(16);

            let relay = spawn_relay(registry.clone(), "s1".into(), conn, tx, POLL);
            registry.close("s1").await;

            tokio::time::timeout(Duration::from_secs(1), relay)
                .await
                .unwrap()
                .unwrap();
            assert!(rx.recv().await.is_none());
        }

        #[tokio::test]
        async fn test_remote_close_reports_connection_lost() {
            let (connector, registry, conn) = setup().await;
            let (tx, mut rx) = mpsc::channel(16);
            let pipe = connector.shell(0).pipe();
            pipe.push_stdout(b"logout\r\n");
            pipe.close();

            let relay = spawn_relay(registry.clone(), "s1".into(), conn, tx, POLL);

            assert_eq!(
                next(&mut rx).await,
                Some(ServerEvent::TerminalOutput {
                    data: "logout\r\n".into()
                })
            );
            assert_eq!(
                next(&mut rx).await,
                Some(ServerEvent::error(
                    ErrorKind::Connection,
                    CONNECTION_LOST_MESSAGE
                ))
            );
            tokio::time::timeout(Duration::from_secs(1), relay)
                .await
                .unwrap()
                .unwrap();
            assert!(registry.get("s1").is_none());
        }

        #[tokio::test]
        async fn test_replacement_detaches_old_relay() {
            let (_connector, registry, conn) = setup().await;
            let (tx, mut rx) = mpsc::channel(16);

            let relay = spawn_relay(registry.clone(), "s1".into(), conn, tx, POLL);
            registry
                .create(
                    "s1",
                    ConnectParams {
                        target: ConnectTarget::new("h2", 22, "u"),
                        credential: Credential::Password("pw".into()),
                    },
                )
                .await
                .unwrap();

            tokio::time::timeout(Duration::from_secs(1), relay)
                .await
                .unwrap()
                .unwrap();
            assert!(rx.recv().await.is_none());
            assert!(registry.get("s1").unwrap().is_active());
        }

        #[tokio::test]
        async fn test_dropped_receiver_stops_relay() {
            let (connector, registry, conn) = setup().await;
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            connector.shell(0).pipe().push_stdout(b"data");

            let relay = spawn_relay(registry, "s1".into(), conn, tx, POLL);
            tokio::time::timeout(Duration::from_secs(1), relay)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
