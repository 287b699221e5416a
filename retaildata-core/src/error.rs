//! Structured error type shared by every data operation.
//!
//! Variants are displayable in CLI output as-is; callers match on the kind
//! (not found, missing credentials, remote failure, ...) rather than on text.

use std::path::PathBuf;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset '{id}' is not in the registry; run `retaildata list` to see available ids")]
    DatasetNotFound { id: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("missing credentials for {service}: {detail}")]
    MissingCredentials { service: String, detail: String },

    #[error("no backend registered for provider '{0}'")]
    UnsupportedProvider(String),

    #[error("remote fetch failed for {target}: {reason}")]
    RemoteFetch { target: String, reason: String },

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("malformed file {}: {reason}", path.display())]
    MalformedFile { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("pipeline failed: {0}")]
    Pipeline(String),

    #[error("table operation failed: {0}")]
    Table(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DataError {
    /// I/O failure with the path that caused it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Remote failure for a URL or dataset reference.
    pub fn remote(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::RemoteFetch {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::MalformedFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_credentials(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingCredentials {
            service: service.into(),
            detail: detail.into(),
        }
    }
}
