//! Backend selection and the credential API used by providers.
//!
//! Candidate backends are probed in order the first time a credential is
//! needed; the first usable one is kept for the manager's lifetime. The
//! selection runs exactly once even under concurrent first use.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::encrypted_file::{EncryptedFileStore, KdfParams};
use super::platform::PlatformStore;
use super::store::{CredentialError, SecretStore};
use crate::config::{env_key, Settings};
use crate::error::DataError;

/// Which backends the manager may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Platform keychain first, encrypted file as fallback.
    #[default]
    Auto,
    Platform,
    File,
}

impl FromStr for BackendPreference {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "platform" | "keyring" => Ok(Self::Platform),
            "file" => Ok(Self::File),
            other => Err(DataError::InvalidConfiguration(format!(
                "unknown credential backend '{other}' (expected auto, platform or file)"
            ))),
        }
    }
}

/// A candidate backend. `probe` returns the store when it is usable.
pub trait StoreProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn probe(&self) -> Option<Arc<dyn SecretStore>>;
}

/// Probe for the OS keychain.
#[derive(Debug, Default)]
pub struct PlatformProbe;

impl StoreProbe for PlatformProbe {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn probe(&self) -> Option<Arc<dyn SecretStore>> {
        PlatformStore::is_usable().then(|| Arc::new(PlatformStore::new()) as Arc<dyn SecretStore>)
    }
}

/// Where the encrypted file's master password comes from.
pub enum PassphraseSource {
    Value(String),
    /// Read from this environment variable at probe time.
    Env(String),
    /// Ask interactively; `None` means the user declined.
    Prompt(Box<dyn Fn() -> Option<String> + Send + Sync>),
}

impl PassphraseSource {
    fn resolve(&self) -> Option<String> {
        let value = match self {
            PassphraseSource::Value(v) => Some(v.clone()),
            PassphraseSource::Env(var) => std::env::var(var).ok(),
            PassphraseSource::Prompt(ask) => ask(),
        };
        value.filter(|v| !v.is_empty())
    }
}

impl fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassphraseSource::Value(_) => f.write_str("Value(<redacted>)"),
            PassphraseSource::Env(var) => write!(f, "Env({var})"),
            PassphraseSource::Prompt(_) => f.write_str("Prompt"),
        }
    }
}

/// Probe for the encrypted credential file.
#[derive(Debug)]
pub struct FileProbe {
    path: PathBuf,
    passphrase: PassphraseSource,
    params: KdfParams,
}

impl FileProbe {
    pub fn new(path: impl Into<PathBuf>, passphrase: PassphraseSource, params: KdfParams) -> Self {
        Self {
            path: path.into(),
            passphrase,
            params,
        }
    }
}

impl StoreProbe for FileProbe {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn probe(&self) -> Option<Arc<dyn SecretStore>> {
        let Some(passphrase) = self.passphrase.resolve() else {
            debug!("no master password available for the credential file");
            return None;
        };
        match EncryptedFileStore::open(&self.path, &passphrase, self.params) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "credential file unusable");
                None
            }
        }
    }
}

struct ActiveStore {
    name: &'static str,
    store: Arc<dyn SecretStore>,
}

/// Selects a secret store once and routes every credential call to it.
pub struct CredentialManager {
    probes: Vec<Box<dyn StoreProbe>>,
    active: OnceLock<Option<ActiveStore>>,
}

impl CredentialManager {
    /// Manager that tries `probes` in order on first use.
    pub fn new(probes: Vec<Box<dyn StoreProbe>>) -> Self {
        Self {
            probes,
            active: OnceLock::new(),
        }
    }

    /// Manager with an already-selected store.
    pub fn with_store(store: Arc<dyn SecretStore>) -> Self {
        let active = OnceLock::new();
        let _ = active.set(Some(ActiveStore {
            name: store.name(),
            store,
        }));
        Self {
            probes: Vec::new(),
            active,
        }
    }

    /// Standard probe order for the configured backend preference. The
    /// master password comes from settings, falling back to the
    /// `RETAILDATA_MASTER_PASSWORD` variable at probe time.
    pub fn from_settings(settings: &Settings) -> Self {
        let passphrase = match &settings.master_password {
            Some(value) => PassphraseSource::Value(value.clone()),
            None => PassphraseSource::Env(env_key("MASTER_PASSWORD")),
        };
        Self::from_settings_with(settings, passphrase)
    }

    pub fn from_settings_with(settings: &Settings, passphrase: PassphraseSource) -> Self {
        let file = || -> Box<dyn StoreProbe> {
            Box::new(FileProbe::new(
                settings.credential_file.clone(),
                passphrase,
                KdfParams::default(),
            ))
        };
        let probes: Vec<Box<dyn StoreProbe>> = match settings.credential_backend {
            BackendPreference::Auto => vec![Box::new(PlatformProbe), file()],
            BackendPreference::Platform => vec![Box::new(PlatformProbe)],
            BackendPreference::File => vec![file()],
        };
        Self::new(probes)
    }

    fn active(&self) -> Option<&ActiveStore> {
        self.active
            .get_or_init(|| {
                for probe in &self.probes {
                    if let Some(store) = probe.probe() {
                        info!(backend = probe.name(), "credential store selected");
                        return Some(ActiveStore {
                            name: probe.name(),
                            store,
                        });
                    }
                    debug!(backend = probe.name(), "credential store not usable");
                }
                warn!("no usable credential store");
                None
            })
            .as_ref()
    }

    fn store(&self) -> Result<&dyn SecretStore, CredentialError> {
        self.active()
            .map(|a| a.store.as_ref())
            .ok_or(CredentialError::NoSecretStore)
    }

    /// Name of the selected backend, probing if necessary.
    pub fn active_backend(&self) -> Option<&'static str> {
        self.active().map(|a| a.name)
    }

    pub fn get_credential(
        &self,
        service: &str,
        account: &str,
    ) -> Result<Option<String>, CredentialError> {
        self.store()?.get(service, account)
    }

    pub fn set_credential(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), CredentialError> {
        self.store()?.set(service, account, secret)?;
        debug!(service, account, "credential stored");
        Ok(())
    }

    pub fn delete_credential(&self, service: &str, account: &str) -> Result<(), CredentialError> {
        self.store()?.delete(service, account)
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field(
                "probes",
                &self.probes.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("active", &self.active.get().map(|a| a.as_ref().map(|s| s.name)))
            .finish()
    }
}
