//! Provider backends and the dispatcher that routes descriptors to them.
//!
//! A backend only moves bytes into a destination directory. Bookkeeping
//! (checksums, the metadata record) belongs to [`ProviderDispatch`].

pub mod dispatch;
pub mod http;
pub mod hub;
pub mod kaggle;
pub mod openml;
pub mod pipeline;
pub mod tabular;
pub mod uci;

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::credentials::{CredentialError, CredentialManager};
use crate::error::DataError;
use crate::fetch::FetchProgress;
use crate::registry::{CredentialUse, DatasetDescriptor, ProviderKind};

pub use dispatch::ProviderDispatch;
pub use http::HttpProvider;
pub use hub::{HubApi, HubFile, HubHttpApi, HubProvider};
pub use kaggle::{KaggleApi, KaggleAuth, KaggleHttpApi, KaggleProvider, KaggleTarget};
pub use openml::OpenMlApi;
pub use pipeline::{
    LoadedTable, PipelineProvider, PipelineReport, PipelineRequest, PipelineRunner,
    RestApiPipeline,
};
pub use tabular::{TabularApi, TabularFetch, TabularProvider};
pub use uci::UciApi;

/// Per-call acquisition options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Re-acquire even when the dataset is already downloaded.
    pub force: bool,
    /// Glob patterns a hub file must match (all files when empty).
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Hub revision (branch, tag or commit); `main` when unset.
    pub revision: Option<String>,
    /// Pipeline base URL override.
    pub base_url: Option<String>,
    /// Pipeline API key override.
    pub api_key: Option<String>,
}

/// What a backend gets to work with.
pub struct AcquireContext<'a> {
    /// Final home of the raw files (`raw/<id>`).
    pub destination: &'a Path,
    /// Scratch directory, removed after the backend returns.
    pub staging: &'a Path,
    pub options: &'a AcquireOptions,
    pub progress: &'a dyn FetchProgress,
}

/// What a backend reports back for the metadata record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Acquisition {
    pub source_url: String,
    pub extra: BTreeMap<String, Value>,
}

impl Acquisition {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// One remote source family.
pub trait DatasetProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn credential_use(&self) -> CredentialUse {
        self.kind().credential_use()
    }

    /// Materialize the dataset's files under `ctx.destination`.
    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError>;
}

/// Error for a descriptor routed to a backend that cannot read its locator.
pub(crate) fn locator_mismatch(descriptor: &DatasetDescriptor, expected: &str) -> DataError {
    DataError::InvalidConfiguration(format!(
        "dataset '{}' has a '{}' locator but the {} backend expects {expected}",
        descriptor.id,
        descriptor.locator.kind_name(),
        descriptor.provider
    ))
}

/// A secret that must be present.
pub(crate) fn require_secret(
    credentials: &CredentialManager,
    service: &str,
    account: &str,
) -> Result<String, DataError> {
    match credentials.get_credential(service, account) {
        Ok(Some(secret)) => Ok(secret),
        Ok(None) => Err(DataError::missing_credentials(
            service,
            format!("'{account}' is not set; run `retaildata auth set {service} {account}`"),
        )),
        Err(CredentialError::NoSecretStore) => Err(DataError::missing_credentials(
            service,
            "no credential store is available; enable the platform keychain or set RETAILDATA_MASTER_PASSWORD",
        )),
        Err(e) => Err(e.into()),
    }
}

/// A secret that may be absent; store problems count as absent.
pub(crate) fn optional_secret(
    credentials: &CredentialManager,
    service: &str,
    account: &str,
) -> Option<String> {
    match credentials.get_credential(service, account) {
        Ok(secret) => secret,
        Err(e) => {
            tracing::debug!(service, account, error = %e, "optional credential unavailable");
            None
        }
    }
}
