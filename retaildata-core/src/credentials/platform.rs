//! OS keychain backend (macOS Keychain, Windows Credential Manager, Secret Service).

use keyring::Entry;
use tracing::debug;

use super::store::{CredentialError, SecretStore};

const PROBE_SERVICE: &str = "retaildata";
const PROBE_ACCOUNT: &str = "__probe__";

/// Secrets kept in the platform keychain, one entry per `(service, account)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformStore;

impl PlatformStore {
    pub fn new() -> Self {
        Self
    }

    /// Whether the keychain answers at all. A missing sentinel entry counts
    /// as usable; any platform failure does not.
    pub fn is_usable() -> bool {
        let result = Entry::new(PROBE_SERVICE, PROBE_ACCOUNT).and_then(|entry| entry.get_password());
        match result {
            Ok(_) | Err(keyring::Error::NoEntry) => true,
            Err(e) => {
                debug!(error = %e, "platform keychain probe failed");
                false
            }
        }
    }

    fn entry(service: &str, account: &str) -> Result<Entry, CredentialError> {
        Entry::new(service, account).map_err(platform_error)
    }
}

impl SecretStore for PlatformStore {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(platform_error(e)),
        }
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CredentialError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(platform_error)
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), CredentialError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(platform_error(e)),
        }
    }
}

fn platform_error(e: keyring::Error) -> CredentialError {
    CredentialError::Platform(e.to_string())
}
