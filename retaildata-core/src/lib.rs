//! RetailData Core: dataset catalog, credentials, cache layout, fetching, provider dispatch.
//!
//! This crate holds everything needed to turn a dataset id into raw files on disk:
//! - Dataset registry with the built-in retail catalog
//! - Credential manager over the platform keychain or an encrypted file store
//! - Cache layout, metadata records and checksum manifests
//! - Bounded parallel HTTP fetching with progress reporting
//! - Provider backends (HTTP, Kaggle, dataset hub, UCI, OpenML, REST pipeline)

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod providers;
pub mod registry;

pub use error::DataError;
