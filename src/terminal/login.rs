//! Session authentication for the terminal WebSocket.
//!
//! The gateway never decides who may open a terminal. It asks a
//! [`SessionAuthenticator`] whether the token presented on upgrade belongs
//! to a logged-in user. [`LoginRegistry`] is the in-process implementation:
//! the surrounding application grants tokens after its own login flow, and
//! each successful check slides the expiry forward.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

/// Answers whether a presented token is logged in.
pub trait SessionAuthenticator: Send + Sync {
    fn is_authenticated(&self, token: &str) -> bool;
}

/// Time-limited login flags keyed by token.
pub struct LoginRegistry {
    logins: DashMap<String, Instant>,
    ttl: Duration,
}

impl LoginRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            logins: DashMap::new(),
            ttl,
        }
    }

    /// Mark `token` as logged in for the next `ttl`.
    pub fn grant(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        self.logins.insert(token, Instant::now());
        info!("Terminal access granted ({} active)", self.logins.len());
    }

    /// Log `token` out. Returns whether it was logged in.
    pub fn revoke(&self, token: &str) -> bool {
        self.logins.remove(token).is_some()
    }

    /// Drop every expired login. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.logins.len();
        self.logins
            .retain(|_, granted| granted.elapsed() <= self.ttl);
        let purged = before.saturating_sub(self.logins.len());
        if purged > 0 {
            debug!("Purged {} expired terminal login(s)", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.logins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logins.is_empty()
    }
}

impl SessionAuthenticator for LoginRegistry {
    fn is_authenticated(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        let expired = match self.logins.get_mut(token) {
            None => return false,
            Some(mut last_seen) => {
                if last_seen.elapsed() > self.ttl {
                    true
                } else {
                    *last_seen = Instant::now();
                    false
                }
            }
        };

        if expired {
            self.logins.remove(token);
            debug!("Terminal login expired");
        }
        !expired
    }
}
