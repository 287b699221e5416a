//! Routes a descriptor to its backend and records the result.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::http::HttpProvider;
use super::hub::{HubHttpApi, HubProvider};
use super::kaggle::{KaggleHttpApi, KaggleProvider};
use super::openml::OpenMlApi;
use super::pipeline::{PipelineProvider, RestApiPipeline};
use super::tabular::TabularProvider;
use super::uci::UciApi;
use super::{AcquireContext, AcquireOptions, DatasetProvider};
use crate::cache::layout::{CHECKSUMS_FILE, METADATA_FILE};
use crate::cache::{ChecksumManifest, DatasetMetadataRecord};
use crate::config::Settings;
use crate::credentials::CredentialManager;
use crate::error::DataError;
use crate::fetch::http::{api_client, download_client};
use crate::fetch::{FetchProgress, ParallelFetcher};
use crate::registry::{DatasetDescriptor, ProviderKind};

/// Provider kind → backend, fixed after construction.
pub struct ProviderDispatch {
    backends: HashMap<ProviderKind, Box<dyn DatasetProvider>>,
    staging_root: PathBuf,
}

impl ProviderDispatch {
    /// No backends; add them with [`with_provider`](Self::with_provider).
    pub fn empty(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            backends: HashMap::new(),
            staging_root: staging_root.into(),
        }
    }

    /// Every built-in backend wired to the real remote services.
    pub fn standard(
        settings: &Settings,
        credentials: Arc<CredentialManager>,
        fetcher: Arc<ParallelFetcher>,
    ) -> Result<Self, DataError> {
        let api = api_client(settings.http_timeout())?;
        let downloads = download_client(settings.http_timeout())?;

        Ok(Self::empty(settings.cache_dir.join("staging"))
            .with_provider(Box::new(HttpProvider::new(fetcher.clone())))
            .with_provider(Box::new(KaggleProvider::new(
                credentials.clone(),
                Box::new(KaggleHttpApi::new(downloads)),
            )))
            .with_provider(Box::new(HubProvider::new(
                credentials.clone(),
                Box::new(HubHttpApi::new(api.clone(), &settings.hub_endpoint)),
                fetcher,
            )))
            .with_provider(Box::new(TabularProvider::uci(Box::new(UciApi::new(
                api.clone(),
            )))))
            .with_provider(Box::new(TabularProvider::openml(Box::new(OpenMlApi::new(
                api.clone(),
            )))))
            .with_provider(Box::new(PipelineProvider::new(
                credentials,
                Box::new(RestApiPipeline::new(api)),
            ))))
    }

    /// Register a backend, replacing any previous one for the same kind.
    pub fn with_provider(mut self, provider: Box<dyn DatasetProvider>) -> Self {
        self.backends.insert(provider.kind(), provider);
        self
    }

    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Acquire `descriptor` into `destination` and record it under
    /// `meta_dir/<id>/`.
    ///
    /// Any previous metadata record is removed first and the new one is
    /// written only after the checksum manifest, so an interrupted or failed
    /// acquisition never looks downloaded.
    pub fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        destination: &Path,
        meta_dir: &Path,
        options: &AcquireOptions,
        progress: &dyn FetchProgress,
    ) -> Result<DatasetMetadataRecord, DataError> {
        let backend = self
            .backends
            .get(&descriptor.provider)
            .ok_or_else(|| DataError::UnsupportedProvider(descriptor.provider.to_string()))?;

        let record_dir = meta_dir.join(&descriptor.id);
        let metadata_path = record_dir.join(METADATA_FILE);
        remove_file_if_exists(&metadata_path)?;

        fs::create_dir_all(destination).map_err(|e| DataError::io(destination, e))?;
        let staging = self.staging_root.join(&descriptor.id);
        fs::create_dir_all(&staging).map_err(|e| DataError::io(&staging, e))?;

        info!(dataset = %descriptor.id, provider = %descriptor.provider, "acquiring dataset");
        let ctx = AcquireContext {
            destination,
            staging: &staging,
            options,
            progress,
        };
        let result = backend.acquire(descriptor, &ctx);
        if let Err(e) = fs::remove_dir_all(&staging) {
            debug!(dir = %staging.display(), error = %e, "staging cleanup failed");
        }
        let acquisition = result?;

        let manifest = ChecksumManifest::compute(destination)?;
        manifest.write(&record_dir.join(CHECKSUMS_FILE))?;

        let record = DatasetMetadataRecord::new(
            &descriptor.id,
            descriptor.provider,
            acquisition.source_url,
        )
        .with_extra(acquisition.extra);
        record.write(&metadata_path)?;

        info!(dataset = %descriptor.id, files = manifest.len(), "dataset acquired");
        Ok(record)
    }
}

fn remove_file_if_exists(path: &Path) -> Result<(), DataError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DataError::io(path, e)),
    }
}
