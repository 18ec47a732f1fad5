//! Protocol-facing half of the terminal service.
//!
//! One [`SessionContext`] exists per WebSocket. The socket read loop hands
//! every text frame to [`SessionGateway::handle_text`] and awaits it before
//! reading the next one, so the events of one session are handled in arrival
//! order while sessions run concurrently.
//!
//! Session states:
//!
//! ```text
//! Unconnected --connect-ssh--> Connecting --ok--> Connected
//!      ^                            |                  |
//!      +-----------failure----------+                  |
//!      +------disconnect-ssh / lost / input failure----+
//! ```
//!
//! Every failure becomes an `error` event for the browser. Nothing here
//! returns an error to the socket loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit::CommandAudit;
use super::auth::Credential;
use super::config::GatewayConfig;
use super::error::TerminalError;
use super::registry::{ConnectParams, ConnectionRegistry};
use super::relay::spawn_relay;
use super::shell::ConnectTarget;
use super::types::{ClientEvent, ConnectRequest, ServerEvent, StatusKind};

pub const READY_MESSAGE: &str = "WebSocket connected. Ready to establish SSH connection.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
}

/// Per-WebSocket state.
pub struct SessionContext {
    id: String,
    outbound: mpsc::Sender<ServerEvent>,
    state: SessionState,
    relay: Option<JoinHandle<()>>,
    audit: CommandAudit,
}

impl SessionContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!("Dropping event for closed session {}", self.id);
        }
    }

    async fn emit_error(&self, err: &TerminalError) {
        self.emit(ServerEvent::from_error(err)).await;
    }

    fn stop_relay(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

pub struct SessionGateway {
    registry: Arc<ConnectionRegistry>,
    relay_poll_interval: Duration,
    default_key_path: Option<PathBuf>,
    audit_commands: bool,
}

impl SessionGateway {
    pub fn new(registry: Arc<ConnectionRegistry>, config: &GatewayConfig) -> Self {
        Self {
            registry,
            relay_poll_interval: config.relay_poll_interval,
            default_key_path: config.default_key_path.clone(),
            audit_commands: config.audit_commands,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Create the context for a freshly upgraded socket.
    pub fn open_session(&self, outbound: mpsc::Sender<ServerEvent>) -> SessionContext {
        SessionContext {
            id: Uuid::new_v4().to_string(),
            outbound,
            state: SessionState::Unconnected,
            relay: None,
            audit: CommandAudit::new(),
        }
    }

    /// Greet the browser once the socket is up.
    pub async fn on_open(&self, ctx: &SessionContext) {
        info!("SSH terminal client connected: {}", ctx.id);
        ctx.emit(ServerEvent::status(StatusKind::Disconnected, READY_MESSAGE))
            .await;
    }

    /// Tear down whatever the session left behind.
    pub async fn on_close(&self, ctx: &mut SessionContext) {
        ctx.stop_relay();
        self.registry.close(&ctx.id).await;
        ctx.state = SessionState::Unconnected;
        info!("SSH terminal client disconnected: {}", ctx.id);
    }

    /// Parse and dispatch one text frame.
    pub async fn handle_text(&self, ctx: &mut SessionContext, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_event(ctx, event).await,
            Err(e) => {
                debug!("Rejected frame from session {}: {}", ctx.id, e);
                ctx.emit_error(&e).await;
            }
        }
    }

    pub async fn handle_event(&self, ctx: &mut SessionContext, event: ClientEvent) {
        match event {
            ClientEvent::ConnectSsh(request) => self.connect(ctx, request).await,
            ClientEvent::TerminalInput { data } => self.input(ctx, &data).await,
            ClientEvent::ResizeTerminal { cols, rows } => {
                if !self.registry.resize(&ctx.id, cols, rows).await {
                    warn!(
                        "Failed to resize terminal to {}x{} for session {}",
                        cols, rows, ctx.id
                    );
                }
            }
            ClientEvent::DisconnectSsh => {
                ctx.stop_relay();
                self.registry.close(&ctx.id).await;
                ctx.state = SessionState::Unconnected;
                ctx.emit(ServerEvent::status(
                    StatusKind::Disconnected,
                    "SSH connection closed",
                ))
                .await;
            }
            ClientEvent::GetStatus => match self.registry.status(&ctx.id) {
                Ok(status) => ctx.emit(ServerEvent::ConnectionStatus(status)).await,
                Err(e) => {
                    warn!("Status for session {} unavailable: {}", ctx.id, e);
                    ctx.emit_error(&e).await;
                }
            },
        }
    }

    /// Pick the single credential for a request.
    ///
    /// `key_auth` selects the request's `key_path` or the configured default
    /// key and ignores any password. Otherwise the password is used, empty
    /// when absent.
    pub fn connect_params(&self, request: ConnectRequest) -> Result<ConnectParams, TerminalError> {
        let target = ConnectTarget::new(request.host, request.port, request.username);

        let credential = if request.key_auth {
            if request.password.is_some() {
                warn!(
                    "Ignoring password for {}: key authentication requested",
                    target
                );
            }
            let key_path = request
                .key_path
                .map(PathBuf::from)
                .or_else(|| self.default_key_path.clone())
                .ok_or_else(|| {
                    TerminalError::Validation(
                        "No private key available for key authentication".into(),
                    )
                })?;
            Credential::PrivateKey(key_path)
        } else {
            Credential::Password(request.password.unwrap_or_default())
        };

        Ok(ConnectParams { target, credential })
    }

    async fn connect(&self, ctx: &mut SessionContext, request: ConnectRequest) {
        let params = match self.connect_params(request) {
            Ok(params) => params,
            Err(e) => {
                ctx.emit_error(&e).await;
                return;
            }
        };
        let target = params.target.to_string();

        ctx.stop_relay();
        ctx.state = SessionState::Connecting;
        ctx.emit(ServerEvent::status(
            StatusKind::Connecting,
            format!("Connecting to {}...", target),
        ))
        .await;

        match self.registry.create(&ctx.id, params).await {
            Ok(conn) => {
                ctx.state = SessionState::Connected;
                ctx.audit.reset();
                ctx.emit(ServerEvent::status(
                    StatusKind::Connected,
                    format!("Connected to {}", target),
                ))
                .await;
                ctx.relay = Some(spawn_relay(
                    self.registry.clone(),
                    ctx.id.clone(),
                    conn,
                    ctx.outbound.clone(),
                    self.relay_poll_interval,
                ));
            }
            Err(e) => {
                ctx.state = SessionState::Unconnected;
                ctx.emit_error(&e).await;
            }
        }
    }

    async fn input(&self, ctx: &mut SessionContext, data: &str) {
        if !self.registry.send_input(&ctx.id, data.as_bytes()).await {
            ctx.state = SessionState::Unconnected;
            ctx.emit_error(&TerminalError::NotConnected).await;
            return;
        }

        if self.audit_commands
            && let Some(conn) = self.registry.get(&ctx.id)
        {
            ctx.audit
                .record(&ctx.id, &conn.target().to_string(), data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::connection::ConnectionSettings;
    use crate::terminal::error::ErrorKind;
    use crate::terminal::testing::MockConnector;
    use serde_json::json;

    struct Harness {
        connector: Arc<MockConnector>,
        gateway: SessionGateway,
        ctx: SessionContext,
        rx: mpsc::Receiver<ServerEvent>,
    }

    impl Harness {
        fn new(connector: MockConnector) -> Self {
            Self::with_config(connector, GatewayConfig::default())
        }

        fn with_config(connector: MockConnector, config: GatewayConfig) -> Self {
            let connector = Arc::new(connector);
            let registry = Arc::new(ConnectionRegistry::new(
                connector.clone(),
                ConnectionSettings {
                    connect_timeout: Duration::from_millis(500),
                    idle_timeout: Duration::from_secs(60),
                    io_timeout: Duration::from_secs(1),
                },
            ));
            let config = GatewayConfig {
                relay_poll_interval: Duration::from_millis(5),
                ..config
            };
            let gateway = SessionGateway::new(registry, &config);
            let (tx, rx) = mpsc::channel(64);
            let ctx = gateway.open_session(tx);
            Self {
                connector,
                gateway,
                ctx,
                rx,
            }
        }

        async fn send(&mut self, frame: serde_json::Value) {
            self.gateway
                .handle_text(&mut self.ctx, &frame.to_string())
                .await;
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }

        async fn next(&mut self) -> Option<ServerEvent> {
            tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .ok()
                .flatten()
        }

        async fn connect(&mut self) {
            self.send(json!({
                "event": "connect-ssh",
                "data": {"host": "10.0.0.5", "port": 22, "username": "deploy", "password": "pw"}
            }))
            .await;
        }
    }

    fn status_of(event: &ServerEvent) -> Option<StatusKind> {
        match event {
            ServerEvent::ConnectionStatus(status) => Some(status.status),
            _ => None,
        }
    }

    fn error_kind(event: &ServerEvent) -> Option<ErrorKind> {
        match event {
            ServerEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_on_open_greets() {
            let mut h = Harness::new(MockConnector::new());
            h.gateway.on_open(&h.ctx).await;

            assert_eq!(
                h.drain(),
                vec![ServerEvent::status(StatusKind::Disconnected, READY_MESSAGE)]
            );
        }

        #[tokio::test]
        async fn test_session_ids_are_unique() {
            let h = Harness::new(MockConnector::new());
            let (tx, _rx) = mpsc::channel(1);
            let other = h.gateway.open_session(tx);
            assert_ne!(h.ctx.id(), other.id());
        }

        #[tokio::test]
        async fn test_socket_close_releases_connection() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            assert!(h.gateway.registry().get(h.ctx.id()).is_some());

            h.gateway.on_close(&mut h.ctx).await;

            assert!(h.gateway.registry().get(h.ctx.id()).is_none());
            assert!(h.connector.shell(0).is_closed());
            assert_eq!(h.ctx.state(), SessionState::Unconnected);
        }
    }

    mod connect_ssh {
        use super::*;

        #[tokio::test]
        async fn test_successful_connect() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;

            let events = h.drain();
            assert_eq!(
                events,
                vec![
                    ServerEvent::status(StatusKind::Connecting, "Connecting to deploy@10.0.0.5:22..."),
                    ServerEvent::status(StatusKind::Connected, "Connected to deploy@10.0.0.5:22"),
                ]
            );
            assert_eq!(h.ctx.state(), SessionState::Connected);
            assert_eq!(
                h.connector.credentials(),
                vec![Credential::Password("pw".into())]
            );
        }

        #[tokio::test]
        async fn test_unreachable_host() {
            let mut h = Harness::new(MockConnector::failing(
                "Failed to connect: failed to lookup address information",
            ));
            h.send(json!({
                "event": "connect-ssh",
                "data": {"host": "bad.invalid", "port": 22, "username": "u"}
            }))
            .await;

            let events = h.drain();
            assert_eq!(events.len(), 2);
            assert_eq!(status_of(&events[0]), Some(StatusKind::Connecting));
            assert_eq!(error_kind(&events[1]), Some(ErrorKind::Connection));
            assert!(!events.iter().any(|e| status_of(e) == Some(StatusKind::Connected)));
            assert!(h.gateway.registry().is_empty());
            assert_eq!(h.ctx.state(), SessionState::Unconnected);
        }

        #[tokio::test]
        async fn test_refused_shell_channel_is_a_connection_error() {
            let mut h = Harness::new(MockConnector::channel_refused(
                "PTY request failed: refused",
            ));
            h.connect().await;

            let events = h.drain();
            assert_eq!(events.len(), 2);
            assert_eq!(status_of(&events[0]), Some(StatusKind::Connecting));
            assert_eq!(error_kind(&events[1]), Some(ErrorKind::Connection));
            match &events[1] {
                ServerEvent::Error { message, .. } => assert!(!message.contains("PTY")),
                other => panic!("expected error event, got {other:?}"),
            }
            assert!(h.gateway.registry().is_empty());
            assert_eq!(h.ctx.state(), SessionState::Unconnected);
        }

        #[tokio::test]
        async fn test_empty_host_is_rejected_before_registry() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({
                "event": "connect-ssh",
                "data": {"host": "", "port": 22, "username": "u"}
            }))
            .await;

            assert_eq!(
                h.drain(),
                vec![ServerEvent::error(
                    ErrorKind::Validation,
                    "Missing required field: host"
                )]
            );
            assert!(h.connector.attempts().is_empty());
        }

        #[tokio::test]
        async fn test_malformed_port() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({
                "event": "connect-ssh",
                "data": {"host": "h", "port": "abc", "username": "u"}
            }))
            .await;

            let events = h.drain();
            assert_eq!(error_kind(&events[0]), Some(ErrorKind::Validation));
            assert!(h.connector.attempts().is_empty());
        }

        #[tokio::test]
        async fn test_key_auth_uses_request_key_and_ignores_password() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({
                "event": "connect-ssh",
                "data": {
                    "host": "h", "port": 22, "username": "u",
                    "password": "pw", "key_auth": true, "key_path": "/keys/id_ed25519"
                }
            }))
            .await;

            assert_eq!(
                h.connector.credentials(),
                vec![Credential::PrivateKey(PathBuf::from("/keys/id_ed25519"))]
            );
        }

        #[tokio::test]
        async fn test_key_auth_falls_back_to_configured_key() {
            let config = GatewayConfig {
                default_key_path: Some(PathBuf::from("/etc/gateway/id_rsa")),
                ..GatewayConfig::default()
            };
            let mut h = Harness::with_config(MockConnector::new(), config);
            h.send(json!({
                "event": "connect-ssh",
                "data": {"host": "h", "port": 22, "username": "u", "key_auth": true}
            }))
            .await;

            assert_eq!(
                h.connector.credentials(),
                vec![Credential::PrivateKey(PathBuf::from("/etc/gateway/id_rsa"))]
            );
        }

        #[tokio::test]
        async fn test_key_auth_without_any_key() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({
                "event": "connect-ssh",
                "data": {"host": "h", "port": 22, "username": "u", "key_auth": true}
            }))
            .await;

            let events = h.drain();
            assert_eq!(events.len(), 1);
            assert_eq!(error_kind(&events[0]), Some(ErrorKind::Validation));
            assert!(h.connector.attempts().is_empty());
        }

        #[tokio::test]
        async fn test_reconnect_replaces_connection() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.connect().await;

            assert_eq!(h.connector.opened(), 2);
            assert!(h.connector.shell(0).is_closed());
            assert!(!h.connector.shell(1).is_closed());
            assert_eq!(h.gateway.registry().len(), 1);
        }
    }

    mod terminal_io {
        use super::*;

        #[tokio::test]
        async fn test_input_is_forwarded() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.send(json!({"event": "terminal-input", "data": {"data": "ls -la\r"}}))
                .await;

            assert_eq!(h.connector.shell(0).written(), b"ls -la\r");
            assert!(h.drain().is_empty());
        }

        #[tokio::test]
        async fn test_input_without_connection() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({"event": "terminal_input", "data": {"data": "ls\r"}}))
                .await;

            assert_eq!(
                h.drain(),
                vec![ServerEvent::error(
                    ErrorKind::Connection,
                    "No active SSH connection"
                )]
            );
        }

        #[tokio::test]
        async fn test_dangerous_input_is_not_blocked() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.send(json!({"event": "terminal-input", "data": {"data": "reboot now\r"}}))
                .await;

            assert_eq!(h.connector.shell(0).written(), b"reboot now\r");
            assert!(h.drain().is_empty());
        }

        #[tokio::test]
        async fn test_output_is_relayed() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.connector.shell(0).pipe().push_stdout(b"deploy@host:~$ ");

            assert_eq!(
                h.next().await,
                Some(ServerEvent::TerminalOutput {
                    data: "deploy@host:~$ ".into()
                })
            );
        }

        #[tokio::test]
        async fn test_zero_resize_is_silent() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.send(json!({"event": "resize-terminal", "data": {"cols": 0, "rows": 24}}))
                .await;

            assert!(h.drain().is_empty());
            assert!(h.connector.shell(0).resizes().is_empty());
            assert!(h.gateway.registry().get(h.ctx.id()).unwrap().is_active());
        }

        #[tokio::test]
        async fn test_resize_is_forwarded() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;

            h.send(json!({"event": "resize-terminal", "data": {"cols": 132, "rows": 43}}))
                .await;

            assert_eq!(h.connector.shell(0).resizes(), vec![(132, 43)]);
        }
    }

    mod control {
        use super::*;

        #[tokio::test]
        async fn test_disconnect_ssh() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.send(json!({"event": "disconnect-ssh"})).await;

            assert_eq!(
                h.drain(),
                vec![ServerEvent::status(
                    StatusKind::Disconnected,
                    "SSH connection closed"
                )]
            );
            assert!(h.gateway.registry().is_empty());
            assert!(h.connector.shell(0).is_closed());
        }

        #[tokio::test]
        async fn test_get_status_connected() {
            let mut h = Harness::new(MockConnector::new());
            h.connect().await;
            h.drain();

            h.send(json!({"event": "get-status"})).await;

            let events = h.drain();
            let ServerEvent::ConnectionStatus(status) = &events[0] else {
                panic!("expected connection-status, got {events:?}");
            };
            assert_eq!(status.status, StatusKind::Connected);
            assert_eq!(status.host.as_deref(), Some("10.0.0.5"));
            assert_eq!(status.port, Some(22));
            assert_eq!(status.username.as_deref(), Some("deploy"));
            assert!(status.last_activity.is_some());
        }

        #[tokio::test]
        async fn test_get_status_without_connection() {
            let mut h = Harness::new(MockConnector::new());
            h.send(json!({"event": "get-status"})).await;

            assert_eq!(
                h.drain(),
                vec![ServerEvent::status(
                    StatusKind::Disconnected,
                    "No active connection"
                )]
            );
        }

        #[tokio::test]
        async fn test_garbage_frame() {
            let mut h = Harness::new(MockConnector::new());
            h.gateway.handle_text(&mut h.ctx, "{{{").await;

            let events = h.drain();
            assert_eq!(error_kind(&events[0]), Some(ErrorKind::Validation));
        }
    }
}
