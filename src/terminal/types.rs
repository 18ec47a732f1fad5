//! Wire types for the terminal WebSocket protocol.
//!
//! Every frame is one JSON object: `{"event": "<name>", "data": {...}}`.
//! Event names are kebab-case. Inbound names also accept the snake_case
//! spelling (`connect_ssh`) used by older clients.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorKind, TerminalError};

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.:\[\]-]+$").expect("host pattern is a valid regex")
});

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("username pattern is a valid regex"));

/// Fields of a `connect-ssh` request after validation.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub key_auth: bool,
    pub key_path: Option<String>,
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_auth", &self.key_auth)
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Events sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectSsh(ConnectRequest),
    TerminalInput { data: String },
    /// Unusable dimensions arrive as zero and are rejected by the connection.
    ResizeTerminal { cols: u32, rows: u32 },
    DisconnectSsh,
    GetStatus,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    /// Parse one text frame. Every failure is a validation error.
    pub fn parse(text: &str) -> Result<Self, TerminalError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| TerminalError::Validation(format!("Invalid message: {}", e)))?;

        match envelope.event.replace('_', "-").as_str() {
            "connect-ssh" => parse_connect(&envelope.data).map(ClientEvent::ConnectSsh),
            "terminal-input" => match envelope.data.get("data") {
                Some(Value::String(data)) => Ok(ClientEvent::TerminalInput { data: data.clone() }),
                Some(_) => Err(TerminalError::Validation(
                    "Terminal input must be a string".into(),
                )),
                None => Err(missing("data")),
            },
            "resize-terminal" => Ok(ClientEvent::ResizeTerminal {
                cols: dimension(envelope.data.get("cols")),
                rows: dimension(envelope.data.get("rows")),
            }),
            "disconnect-ssh" => Ok(ClientEvent::DisconnectSsh),
            "get-status" => Ok(ClientEvent::GetStatus),
            other => Err(TerminalError::Validation(format!(
                "Unknown event: {}",
                other
            ))),
        }
    }
}

fn missing(field: &str) -> TerminalError {
    TerminalError::Validation(format!("Missing required field: {}", field))
}

/// A required string field, trimmed. Absent, null and blank are all missing.
fn required_str(data: &Value, field: &str) -> Result<String, TerminalError> {
    match data.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(missing(field)),
        Some(_) => Err(TerminalError::Validation(format!(
            "Field {} must be a string",
            field
        ))),
    }
}

fn optional_str(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts a JSON integer or a numeric string.
fn parse_port(data: &Value) -> Result<u16, TerminalError> {
    let port = match data.get("port") {
        None | Some(Value::Null) => return Err(missing("port")),
        Some(Value::String(raw)) if raw.trim().is_empty() => return Err(missing("port")),
        Some(Value::String(raw)) => raw.trim().parse::<i64>().ok(),
        Some(Value::Number(number)) => number.as_i64(),
        Some(_) => None,
    };

    let port = port.ok_or_else(|| TerminalError::Validation("Port must be a number".into()))?;
    if !(1..=65535).contains(&port) {
        return Err(TerminalError::Validation(
            "Port must be between 1 and 65535".into(),
        ));
    }
    u16::try_from(port)
        .map_err(|_| TerminalError::Validation("Port must be between 1 and 65535".into()))
}

fn parse_key_auth(data: &Value) -> bool {
    match data.get("key_auth") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(raw)) => raw.eq_ignore_ascii_case("true") || raw == "1",
        Some(Value::Number(number)) => number.as_i64() == Some(1),
        _ => false,
    }
}

fn parse_connect(data: &Value) -> Result<ConnectRequest, TerminalError> {
    let host = required_str(data, "host")?;
    let port = parse_port(data)?;
    let username = required_str(data, "username")?;

    if !HOST_PATTERN.is_match(&host) {
        return Err(TerminalError::Validation("Invalid host format".into()));
    }
    if !USERNAME_PATTERN.is_match(&username) {
        return Err(TerminalError::Validation("Invalid username format".into()));
    }

    Ok(ConnectRequest {
        host,
        port,
        username,
        // Passwords may legitimately contain surrounding spaces.
        password: data
            .get("password")
            .and_then(Value::as_str)
            .filter(|password| !password.is_empty())
            .map(str::to_string),
        key_auth: parse_key_auth(data),
        key_path: optional_str(data, "key_path"),
    })
}

/// Terminal dimension, or zero when absent, negative or not an integer.
fn dimension(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(raw)) => raw.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or(0)
}

/// Lifecycle state reported in `connection-status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusKind::Connecting => write!(f, "connecting"),
            StatusKind::Connected => write!(f, "connected"),
            StatusKind::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Payload of a `connection-status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: StatusKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// RFC3339 timestamp of the last send or non-empty read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
}

impl ConnectionStatus {
    pub fn new(status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            host: None,
            port: None,
            username: None,
            last_activity: None,
        }
    }
}

/// Point-in-time view of a registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub active: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: &'static str,
    pub last_activity: DateTime<Utc>,
}

impl ConnectionSnapshot {
    /// Render as a status payload. Inactive connections carry no details.
    pub fn to_status(&self) -> ConnectionStatus {
        if !self.active {
            return ConnectionStatus::new(StatusKind::Disconnected, "Connection inactive");
        }

        ConnectionStatus {
            status: StatusKind::Connected,
            message: format!("Connected to {}@{}:{}", self.username, self.host, self.port),
            host: Some(self.host.clone()),
            port: Some(self.port),
            username: Some(self.username.clone()),
            last_activity: Some(
                self.last_activity
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        }
    }
}

/// Events sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectionStatus(ConnectionStatus),
    TerminalOutput {
        data: String,
    },
    Error {
        #[serde(rename = "type")]
        kind: ErrorKind,
        message: String,
    },
}

impl ServerEvent {
    pub fn status(status: StatusKind, message: impl Into<String>) -> Self {
        ServerEvent::ConnectionStatus(ConnectionStatus::new(status, message))
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(err: &TerminalError) -> Self {
        Self::error(err.kind(), err.user_message())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
