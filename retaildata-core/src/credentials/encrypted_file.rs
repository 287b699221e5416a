//! Passphrase-encrypted credential file.
//!
//! Format (version 2):
//!
//! ```json
//! {
//!   "version": 2,
//!   "kdf": { "algorithm": "argon2id", "salt": "<b64>", "memory_kib": 65536, "iterations": 2, "lanes": 4 },
//!   "entries": { "kaggle:username": "<b64(nonce ‖ ciphertext)>" }
//! }
//! ```
//!
//! The salt is random per file and the KDF parameters in the header are
//! authoritative when the file is reopened. Each value is sealed with
//! ChaCha20-Poly1305 using the entry key as associated data, so a ciphertext
//! moved to another entry fails to open.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::store::{entry_key, CredentialError, SecretStore};

const FORMAT_VERSION: u32 = 2;
const KDF_ALGORITHM: &str = "argon2id";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, lanes: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            lanes,
        }
    }
}

impl Default for KdfParams {
    /// 64 MiB, 2 passes, 4 lanes.
    fn default() -> Self {
        Self::new(64 * 1024, 2, 4)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfHeader {
    algorithm: String,
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    kdf: KdfHeader,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

impl StoreFile {
    fn empty(kdf: KdfHeader) -> Self {
        Self {
            version: FORMAT_VERSION,
            kdf,
            entries: BTreeMap::new(),
        }
    }
}

/// Credential store backed by a single encrypted JSON file.
pub struct EncryptedFileStore {
    path: PathBuf,
    header: KdfHeader,
    cipher: ChaCha20Poly1305,
    lock: Mutex<()>,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .field("params", &self.header.params)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Open the store at `path`, creating it with a fresh salt and `params`
    /// if it does not exist. An existing file keeps its own salt and
    /// parameters.
    pub fn open(
        path: impl Into<PathBuf>,
        passphrase: &str,
        params: KdfParams,
    ) -> Result<Self, CredentialError> {
        let path = path.into();
        if passphrase.is_empty() {
            return Err(CredentialError::Kdf("master password must not be empty".into()));
        }

        let header = match read_store(&path)? {
            Some(file) => {
                if file.version != FORMAT_VERSION || file.kdf.algorithm != KDF_ALGORITHM {
                    return Err(CredentialError::Corrupt {
                        path,
                        reason: format!(
                            "unsupported format version {} ({})",
                            file.version, file.kdf.algorithm
                        ),
                    });
                }
                file.kdf
            }
            None => {
                let mut salt = [0u8; SALT_LEN];
                rand::rngs::OsRng.fill_bytes(&mut salt);
                let header = KdfHeader {
                    algorithm: KDF_ALGORITHM.to_string(),
                    salt: STANDARD.encode(salt),
                    params,
                };
                write_store(&path, &StoreFile::empty(header.clone()))?;
                debug!(path = %path.display(), "created credential file");
                header
            }
        };

        let salt = STANDARD
            .decode(&header.salt)
            .map_err(|e| CredentialError::Corrupt {
                path: path.clone(),
                reason: format!("salt is not base64: {e}"),
            })?;
        let key = derive_key(passphrase, &salt, header.params)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        Ok(Self {
            path,
            header,
            cipher,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current file contents; a deleted file is recreated with this store's header.
    fn load(&self) -> Result<StoreFile, CredentialError> {
        Ok(read_store(&self.path)?.unwrap_or_else(|| StoreFile::empty(self.header.clone())))
    }

    fn seal(&self, key: &str, secret: &str) -> Result<String, CredentialError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: secret.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| CredentialError::Encryption(key.to_string()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    fn unseal(&self, key: &str, encoded: &str) -> Option<String> {
        let blob = STANDARD.decode(encoded).ok()?;
        if blob.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .ok()?;
        String::from_utf8(plain).ok()
    }
}

impl SecretStore for EncryptedFileStore {
    fn name(&self) -> &'static str {
        "encrypted-file"
    }

    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.guard();
        let file = match self.load() {
            Ok(file) => file,
            Err(e) => {
                warn!(error = %e, "credential file unreadable; treating entry as absent");
                return Ok(None);
            }
        };
        let key = entry_key(service, account);
        let Some(encoded) = file.entries.get(&key) else {
            return Ok(None);
        };
        let secret = self.unseal(&key, encoded);
        if secret.is_none() {
            debug!(entry = %key, "credential entry did not decrypt (wrong master password?)");
        }
        Ok(secret)
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CredentialError> {
        let _guard = self.guard();
        let mut file = self.load()?;
        let key = entry_key(service, account);
        let sealed = self.seal(&key, secret)?;
        file.entries.insert(key, sealed);
        write_store(&self.path, &file)
    }

    fn delete(&self, service: &str, account: &str) -> Result<(), CredentialError> {
        let _guard = self.guard();
        let mut file = self.load()?;
        if file.entries.remove(&entry_key(service, account)).is_none() {
            return Ok(());
        }
        write_store(&self.path, &file)
    }
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<[u8; KEY_LEN], CredentialError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.lanes,
        Some(KEY_LEN),
    )
    .map_err(|e| CredentialError::Kdf(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = [0u8; KEY_LEN];
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CredentialError::Kdf(e.to_string()))?;
    Ok(key)
}

/// `Ok(None)` when the file does not exist; `Corrupt` when it cannot be parsed.
fn read_store(path: &Path) -> Result<Option<StoreFile>, CredentialError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CredentialError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CredentialError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Write to `<path>.tmp`, restrict permissions, then rename into place.
fn write_store(path: &Path, file: &StoreFile) -> Result<(), CredentialError> {
    let io_err = |source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(file).map_err(|e| CredentialError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json).map_err(io_err)?;
    restrict_permissions(&tmp).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(e)
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
