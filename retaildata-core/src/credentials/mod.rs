//! Secret storage: the platform keychain or a passphrase-encrypted file,
//! selected once per process by the [`CredentialManager`].

pub mod encrypted_file;
pub mod manager;
pub mod platform;
pub mod store;

pub use encrypted_file::{EncryptedFileStore, KdfParams};
pub use manager::{
    BackendPreference, CredentialManager, FileProbe, PassphraseSource, PlatformProbe, StoreProbe,
};
pub use platform::PlatformStore;
pub use store::{entry_key, CredentialError, SecretStore};
