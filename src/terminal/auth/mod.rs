//! Explicit-credential authentication for remote shell connections.
//!
//! A connection carries exactly one [`Credential`]: a password or a private
//! key reference. The enum makes the two mutually exclusive, and
//! [`Credential::strategy`] turns it into the matching [`AuthStrategy`].
//! There is no SSH agent and no search of default key locations.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key file authentication

mod key;
mod password;
mod traits;

use std::fmt;
use std::path::PathBuf;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

/// The single credential presented during the handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(PathBuf),
}

impl Credential {
    /// Build the authentication strategy for this credential.
    pub fn strategy(&self) -> Box<dyn AuthStrategy> {
        match self {
            Credential::Password(password) => Box::new(PasswordAuth::new(password.clone())),
            Credential::PrivateKey(path) => Box::new(KeyAuth::new(path.clone())),
        }
    }

    /// Short label for logs.
    pub fn method(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey(_) => "key",
        }
    }
}

// Passwords never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}
