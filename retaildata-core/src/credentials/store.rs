//! The secret store contract shared by every backend.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no usable credential store: the platform keychain is unavailable and no master password was provided (set RETAILDATA_MASTER_PASSWORD)")]
    NoSecretStore,

    #[error("platform keychain error: {0}")]
    Platform(String),

    #[error("credential file {} is unreadable: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("encryption failed for entry '{0}'")]
    Encryption(String),

    #[error("credential store I/O at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A keyed secret store addressed by `(service, account)`.
pub trait SecretStore: Send + Sync {
    /// Backend name for logs and `auth status`.
    fn name(&self) -> &'static str;

    /// Stored secret, or `None` when absent or undecryptable.
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError>;

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CredentialError>;

    /// Remove a secret. Removing an absent entry succeeds.
    fn delete(&self, service: &str, account: &str) -> Result<(), CredentialError>;
}

/// Flat key used by stores that keep one map of entries.
pub fn entry_key(service: &str, account: &str) -> String {
    format!("{service}:{account}")
}
