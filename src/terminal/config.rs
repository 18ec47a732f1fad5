//! Configuration resolution for the terminal gateway.
//!
//! This module handles configuration values with a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TERMINAL_PORT` | 5000 | HTTP/WebSocket listen port |
//! | `SSH_CONNECT_TIMEOUT` | 10s | SSH handshake timeout in seconds |
//! | `SSH_IDLE_TIMEOUT` | 1800s | Inactivity threshold in seconds |
//! | `SSH_IO_TIMEOUT` | 10s | Deadline for one write, resize or close on a channel |
//! | `SSH_REAPER_INTERVAL` | 60s | Reaper sweep period in seconds |
//! | `SSH_RELAY_POLL_MS` | 50ms | Output relay polling cadence |
//! | `SSH_TERM` | xterm-256color | PTY terminal type |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_KEY_PATH` | unset | Default private key used when `key_auth` is requested |
//! | `TERMINAL_OUTBOUND_CAPACITY` | 256 | Per-session outbound event queue |
//! | `TERMINAL_LOGIN_TTL` | 7200s | Sliding login expiry |
//! | `TERMINAL_ACCESS_TOKENS` | unset | Comma-separated tokens granted at startup |
//! | `TERMINAL_AUDIT_COMMANDS` | true | Log dangerous commands typed into terminals |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port
pub(crate) const DEFAULT_PORT: u16 = 5000;

/// Default SSH handshake timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default inactivity threshold in seconds (30 minutes)
pub(crate) const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Default deadline in seconds for a single channel write, resize or close
pub(crate) const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Default reaper period in seconds
pub(crate) const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

/// Default relay polling cadence in milliseconds
pub(crate) const DEFAULT_RELAY_POLL_MS: u64 = 50;

/// Default PTY terminal type
pub(crate) const DEFAULT_TERM: &str = "xterm-256color";

/// Default per-session outbound queue capacity
pub(crate) const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default login expiry in seconds (2 hours)
pub(crate) const DEFAULT_LOGIN_TTL_SECS: u64 = 2 * 60 * 60;

pub(crate) const PORT_ENV_VAR: &str = "TERMINAL_PORT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const IDLE_TIMEOUT_ENV_VAR: &str = "SSH_IDLE_TIMEOUT";
pub(crate) const IO_TIMEOUT_ENV_VAR: &str = "SSH_IO_TIMEOUT";
pub(crate) const REAPER_INTERVAL_ENV_VAR: &str = "SSH_REAPER_INTERVAL";
pub(crate) const RELAY_POLL_ENV_VAR: &str = "SSH_RELAY_POLL_MS";
pub(crate) const TERM_ENV_VAR: &str = "SSH_TERM";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const KEY_PATH_ENV_VAR: &str = "SSH_KEY_PATH";
pub(crate) const OUTBOUND_CAPACITY_ENV_VAR: &str = "TERMINAL_OUTBOUND_CAPACITY";
pub(crate) const LOGIN_TTL_ENV_VAR: &str = "TERMINAL_LOGIN_TTL";
pub(crate) const ACCESS_TOKENS_ENV_VAR: &str = "TERMINAL_ACCESS_TOKENS";
pub(crate) const AUDIT_ENV_VAR: &str = "TERMINAL_AUDIT_COMMANDS";

/// Resolve a numeric value with priority: parameter -> env var -> default.
///
/// Unparseable environment values fall back to the default.
fn resolve_number<T: std::str::FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    // Priority 1: Use parameter if provided
    if let Some(value) = param {
        return value;
    }

    // Priority 2: Use environment variable if set
    if let Ok(env_value) = env::var(env_var)
        && let Ok(value) = env_value.trim().parse::<T>()
    {
        return value;
    }

    // Priority 3: Default value
    default
}

/// Resolve a boolean flag. Only `true` (any case) and `1` enable it.
fn resolve_flag(param: Option<bool>, env_var: &str, default: bool) -> bool {
    if let Some(flag) = param {
        return flag;
    }

    if let Ok(env_flag) = env::var(env_var) {
        return env_flag.eq_ignore_ascii_case("true") || env_flag == "1";
    }

    default
}

pub(crate) fn resolve_port(port_param: Option<u16>) -> u16 {
    resolve_number(port_param, PORT_ENV_VAR, DEFAULT_PORT)
}

pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_number(
        timeout_param,
        CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_CONNECT_TIMEOUT_SECS,
    ))
}

pub(crate) fn resolve_idle_timeout(timeout_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_number(
        timeout_param,
        IDLE_TIMEOUT_ENV_VAR,
        DEFAULT_IDLE_TIMEOUT_SECS,
    ))
}

/// A zero deadline would fail every write, so it is bumped to one second.
pub(crate) fn resolve_io_timeout(timeout_param: Option<u64>) -> Duration {
    let secs = resolve_number(timeout_param, IO_TIMEOUT_ENV_VAR, DEFAULT_IO_TIMEOUT_SECS);
    Duration::from_secs(secs.max(1))
}

/// Zero would make `tokio::time::interval` panic, so it is bumped to one second.
pub(crate) fn resolve_reaper_interval(interval_param: Option<u64>) -> Duration {
    let secs = resolve_number(
        interval_param,
        REAPER_INTERVAL_ENV_VAR,
        DEFAULT_REAPER_INTERVAL_SECS,
    );
    Duration::from_secs(secs.max(1))
}

pub(crate) fn resolve_relay_poll_interval(poll_param: Option<u64>) -> Duration {
    let millis = resolve_number(poll_param, RELAY_POLL_ENV_VAR, DEFAULT_RELAY_POLL_MS);
    Duration::from_millis(millis.max(1))
}

pub(crate) fn resolve_term(term_param: Option<String>) -> String {
    if let Some(term) = term_param {
        return term;
    }

    match env::var(TERM_ENV_VAR) {
        Ok(term) if !term.trim().is_empty() => term.trim().to_string(),
        _ => DEFAULT_TERM.to_string(),
    }
}

pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    resolve_flag(compress_param, COMPRESSION_ENV_VAR, true)
}

pub(crate) fn resolve_default_key_path(key_param: Option<PathBuf>) -> Option<PathBuf> {
    if key_param.is_some() {
        return key_param;
    }

    env::var(KEY_PATH_ENV_VAR)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
}

pub(crate) fn resolve_outbound_capacity(capacity_param: Option<usize>) -> usize {
    resolve_number(
        capacity_param,
        OUTBOUND_CAPACITY_ENV_VAR,
        DEFAULT_OUTBOUND_CAPACITY,
    )
    .max(1)
}

pub(crate) fn resolve_login_ttl(ttl_param: Option<u64>) -> Duration {
    Duration::from_secs(resolve_number(
        ttl_param,
        LOGIN_TTL_ENV_VAR,
        DEFAULT_LOGIN_TTL_SECS,
    ))
}

pub(crate) fn resolve_access_tokens() -> Vec<String> {
    env::var(ACCESS_TOKENS_ENV_VAR)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn resolve_audit(audit_param: Option<bool>) -> bool {
    resolve_flag(audit_param, AUDIT_ENV_VAR, true)
}

/// Fully resolved gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
    pub reaper_interval: Duration,
    pub relay_poll_interval: Duration,
    pub term: String,
    pub compression: bool,
    pub default_key_path: Option<PathBuf>,
    pub outbound_capacity: usize,
    pub login_ttl: Duration,
    pub access_tokens: Vec<String>,
    pub audit_commands: bool,
}

impl GatewayConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: resolve_port(None),
            connect_timeout: resolve_connect_timeout(None),
            idle_timeout: resolve_idle_timeout(None),
            io_timeout: resolve_io_timeout(None),
            reaper_interval: resolve_reaper_interval(None),
            relay_poll_interval: resolve_relay_poll_interval(None),
            term: resolve_term(None),
            compression: resolve_compression(None),
            default_key_path: resolve_default_key_path(None),
            outbound_capacity: resolve_outbound_capacity(None),
            login_ttl: resolve_login_ttl(None),
            access_tokens: resolve_access_tokens(),
            audit_commands: resolve_audit(None),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            relay_poll_interval: Duration::from_millis(DEFAULT_RELAY_POLL_MS),
            term: DEFAULT_TERM.to_string(),
            compression: true,
            default_key_path: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            login_ttl: Duration::from_secs(DEFAULT_LOGIN_TTL_SECS),
            access_tokens: Vec::new(),
            audit_commands: true,
        }
    }
}
