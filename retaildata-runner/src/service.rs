//! The application context: one owner for every service.
//!
//! `RetailData` builds the registry, credential manager, fetch engine,
//! provider dispatch, cache and processing managers once and hands them out
//! by reference. Operations on the same dataset id are not serialized here;
//! callers that download and delete one id concurrently must order those
//! calls themselves.

use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::processing::{PrepareOptions, PrepareReport, ProcessingManager};
use crate::readers::read_parquet;
use crate::temporal::{split_by_date, TemporalSplit};
use retaildata_core::cache::{CacheManager, CachedDataset, DataLayout, DatasetMetadataRecord, VerifyReport};
use retaildata_core::config::Settings;
use retaildata_core::credentials::CredentialManager;
use retaildata_core::fetch::{FetchProgress, HttpFetcher, NoProgress, ParallelFetcher};
use retaildata_core::providers::{AcquireOptions, ProviderDispatch};
use retaildata_core::registry::{DatasetDescriptor, Registry};
use retaildata_core::DataError;

/// Semantic table used by `split_temporal` when no table is named.
const DEFAULT_TEMPORAL_TABLE: &str = "sales";

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub acquire: AcquireOptions,
    /// Reuse an existing download. `None` follows `Settings::cache_enabled`.
    pub use_cache: Option<bool>,
    /// Prepare right after the download.
    pub prepare: Option<PrepareOptions>,
}

#[derive(Debug)]
pub struct DownloadOutcome {
    pub metadata: DatasetMetadataRecord,
    /// True when nothing was fetched because the dataset was already present.
    pub from_cache: bool,
    pub prepared: Option<PrepareReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Key tables by their semantic names from the descriptor's mapping.
    pub standardized: bool,
}

pub struct RetailData {
    settings: Settings,
    registry: Arc<Registry>,
    credentials: Arc<CredentialManager>,
    dispatch: ProviderDispatch,
    cache: CacheManager,
    processing: ProcessingManager,
    progress: Arc<dyn FetchProgress>,
}

impl RetailData {
    /// Wire every service from `settings` against the real remote backends.
    pub fn new(settings: Settings) -> Result<Self, DataError> {
        let credentials = Arc::new(CredentialManager::from_settings(&settings));
        Self::with_credentials(settings, credentials)
    }

    /// Like [`new`](Self::new) with a caller-built credential manager, e.g.
    /// one that prompts for the master password.
    pub fn with_credentials(
        settings: Settings,
        credentials: Arc<CredentialManager>,
    ) -> Result<Self, DataError> {
        let mut registry = Registry::builtin()?;
        if let Some(path) = &settings.catalog_path {
            let added = registry.extend_from_file(path)?;
            info!(catalog = %path.display(), added, "loaded user catalog");
        }
        let transport = HttpFetcher::new(settings.http_timeout())?;
        let fetcher = Arc::new(ParallelFetcher::new(
            Arc::new(transport),
            settings.fetch_workers,
        ));
        let dispatch = ProviderDispatch::standard(&settings, credentials.clone(), fetcher)?;
        Ok(Self::from_parts(
            settings,
            Arc::new(registry),
            credentials,
            dispatch,
        ))
    }

    /// Assemble from prebuilt services (tests, embedding).
    pub fn from_parts(
        settings: Settings,
        registry: Arc<Registry>,
        credentials: Arc<CredentialManager>,
        dispatch: ProviderDispatch,
    ) -> Self {
        let layout = DataLayout::new(&settings.data_dir);
        Self {
            cache: CacheManager::new(layout.clone(), registry.clone()),
            processing: ProcessingManager::new(layout),
            settings,
            registry,
            credentials,
            dispatch,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn FetchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn layout(&self) -> &DataLayout {
        self.cache.layout()
    }

    pub fn list_datasets(&self) -> &[DatasetDescriptor] {
        self.registry.list_all()
    }

    pub fn get_dataset(&self, id: &str) -> Result<&DatasetDescriptor, DataError> {
        self.registry
            .get(id)
            .ok_or_else(|| DataError::DatasetNotFound { id: id.to_string() })
    }

    /// Fetch `id` unless a cached copy may be reused, then optionally prepare it.
    pub fn download(&self, id: &str, options: &DownloadOptions) -> Result<DownloadOutcome, DataError> {
        let descriptor = self.get_dataset(id)?;
        let use_cache = options.use_cache.unwrap_or(self.settings.cache_enabled)
            && !options.acquire.force;

        let cached = if use_cache { self.cache.metadata(id)? } else { None };
        let (metadata, from_cache) = match cached {
            Some(record) => {
                info!(dataset = id, "using cached download");
                (record, true)
            }
            None => {
                let layout = self.layout();
                let raw = layout.raw_dir(id);
                // Prepared tables derive from the raw files being replaced.
                for dir in [raw.clone(), layout.prepared_dir(id)] {
                    if dir.exists() {
                        fs::remove_dir_all(&dir).map_err(|e| DataError::io(&dir, e))?;
                    }
                }
                let record = self.dispatch.acquire(
                    descriptor,
                    &raw,
                    &layout.meta_root(),
                    &options.acquire,
                    self.progress.as_ref(),
                )?;
                (record, false)
            }
        };

        let prepared = match &options.prepare {
            Some(prepare) => Some(self.prepare(id, prepare)?),
            None => None,
        };
        Ok(DownloadOutcome {
            metadata,
            from_cache,
            prepared,
        })
    }

    pub fn prepare(&self, id: &str, options: &PrepareOptions) -> Result<PrepareReport, DataError> {
        self.get_dataset(id)?;
        self.processing.prepare(id, options)
    }

    /// Every prepared table of `id`, keyed by file stem (or semantic name).
    pub fn load(&self, id: &str, options: &LoadOptions) -> Result<BTreeMap<String, DataFrame>, DataError> {
        let mut tables = BTreeMap::new();
        for (key, path) in self.prepared_files(id)? {
            tables.insert(key, read_parquet(&path)?);
        }
        self.finish_load(id, options, tables)
    }

    /// Like [`load`](Self::load) but scans lazily.
    pub fn load_lazy(&self, id: &str, options: &LoadOptions) -> Result<BTreeMap<String, LazyFrame>, DataError> {
        let mut tables = BTreeMap::new();
        for (key, path) in self.prepared_files(id)? {
            let frame = LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
                .map_err(|e| DataError::malformed(&path, e))?;
            tables.insert(key, frame);
        }
        self.finish_load(id, options, tables)
    }

    /// Split one prepared table on a date column. Without `table`, the
    /// descriptor's `sales` table is used, else the first table by name.
    pub fn split_temporal(
        &self,
        id: &str,
        date_column: &str,
        split_date: NaiveDate,
        table: Option<&str>,
    ) -> Result<TemporalSplit, DataError> {
        let descriptor = self.get_dataset(id)?;
        let tables = self.load(id, &LoadOptions::default())?;
        let key = match table {
            Some(name) => name.to_string(),
            None => descriptor
                .standard_mapping
                .get(DEFAULT_TEMPORAL_TABLE)
                .filter(|name| tables.contains_key(*name))
                .or_else(|| tables.keys().next())
                .cloned()
                .ok_or_else(|| DataError::NotFound(format!("'{id}' has no prepared tables")))?,
        };
        let df = tables
            .get(&key)
            .ok_or_else(|| DataError::NotFound(format!("table '{key}' is not prepared for '{id}'")))?;
        split_by_date(df, date_column, split_date)
    }

    pub fn delete(&self, id: &str) -> Result<bool, DataError> {
        self.cache.delete(id)
    }

    pub fn purge_all(&self) -> Result<(), DataError> {
        self.cache.purge_all()
    }

    pub fn verify(&self, id: &str) -> Result<VerifyReport, DataError> {
        self.get_dataset(id)?;
        self.cache.verify(id)
    }

    pub fn list_downloaded(&self) -> Result<BTreeMap<String, CachedDataset>, DataError> {
        self.cache.list_downloaded()
    }

    fn prepared_files(&self, id: &str) -> Result<Vec<(String, PathBuf)>, DataError> {
        self.get_dataset(id)?;
        let dir = self.layout().prepared_dir(id);
        if !dir.is_dir() {
            return Err(DataError::NotFound(format!(
                "prepared data for '{id}' not found at {}; run prepare first",
                dir.display()
            )));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| DataError::io(&dir, e))? {
            let path = entry.map_err(|e| DataError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.clone()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn finish_load<T>(
        &self,
        id: &str,
        options: &LoadOptions,
        tables: BTreeMap<String, T>,
    ) -> Result<BTreeMap<String, T>, DataError> {
        if !options.standardized {
            return Ok(tables);
        }
        let descriptor = self.get_dataset(id)?;
        Ok(standardize(&descriptor.standard_mapping, tables))
    }
}

/// Rename tables to their semantic names. Split outputs keep their
/// suffixes (`sales_train`, `sales_test`). Without a mapping the tables are
/// returned unchanged; with one, unmapped tables are dropped.
fn standardize<T>(
    mapping: &BTreeMap<String, String>,
    mut tables: BTreeMap<String, T>,
) -> BTreeMap<String, T> {
    if mapping.is_empty() {
        return tables;
    }
    let mut renamed = BTreeMap::new();
    for (semantic, physical) in mapping {
        if let Some(table) = tables.remove(physical) {
            renamed.insert(semantic.clone(), table);
            continue;
        }
        for suffix in ["_train", "_test"] {
            if let Some(table) = tables.remove(&format!("{physical}{suffix}")) {
                renamed.insert(format!("{semantic}{suffix}"), table);
            }
        }
    }
    renamed
}
