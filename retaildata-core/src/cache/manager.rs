//! Inspection and removal of downloaded datasets.
//!
//! A dataset counts as downloaded only when `meta/<id>/metadata.json`
//! exists; the dispatcher writes that file last.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::layout::DataLayout;
use super::metadata::{ChecksumManifest, DatasetMetadataRecord, VerifyReport};
use crate::error::DataError;
use crate::registry::{validate_dataset_id, Registry};

/// Summary of one downloaded dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedDataset {
    /// Total bytes across raw, prepared and meta trees.
    pub size: u64,
    pub path: PathBuf,
}

pub struct CacheManager {
    layout: DataLayout,
    registry: Arc<Registry>,
}

impl CacheManager {
    pub fn new(layout: DataLayout, registry: Arc<Registry>) -> Self {
        Self { layout, registry }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// True iff `meta/<id>/metadata.json` exists. Registry membership is only
    /// checked by [`list_downloaded`](Self::list_downloaded).
    pub fn is_downloaded(&self, id: &str) -> bool {
        validate_dataset_id(id).is_ok() && self.layout.metadata_path(id).is_file()
    }

    /// Bytes used by a dataset across all managed trees; 0 if nothing exists.
    pub fn size(&self, id: &str) -> u64 {
        if validate_dataset_id(id).is_err() {
            return 0;
        }
        self.layout
            .dataset_dirs(id)
            .iter()
            .map(|dir| dir_size(dir))
            .sum()
    }

    /// Parsed download record, or `None` when the dataset is not downloaded.
    pub fn metadata(&self, id: &str) -> Result<Option<DatasetMetadataRecord>, DataError> {
        if !self.is_downloaded(id) {
            return Ok(None);
        }
        DatasetMetadataRecord::read(&self.layout.metadata_path(id)).map(Some)
    }

    /// Downloaded datasets known to the registry, keyed by id.
    ///
    /// Directories under `meta/` that do not belong to a registered dataset
    /// are ignored.
    pub fn list_downloaded(&self) -> Result<BTreeMap<String, CachedDataset>, DataError> {
        let meta_root = self.layout.meta_root();
        let entries = match fs::read_dir(&meta_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(DataError::io(&meta_root, e)),
        };

        let mut found = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::io(&meta_root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.registry.contains(&id) || !self.is_downloaded(&id) {
                debug!(dir = %entry.path().display(), "skipping unregistered or incomplete entry");
                continue;
            }
            let summary = CachedDataset {
                size: self.size(&id),
                path: self.layout.raw_dir(&id),
            };
            found.insert(id, summary);
        }
        Ok(found)
    }

    /// Remove every tree belonging to `id`. Returns true iff anything was removed.
    pub fn delete(&self, id: &str) -> Result<bool, DataError> {
        validate_dataset_id(id).map_err(DataError::InvalidConfiguration)?;
        let mut removed = false;
        for dir in self.layout.dataset_dirs(id) {
            removed |= remove_tree(&dir)?;
        }
        if removed {
            info!(dataset = id, "deleted cached dataset");
        }
        Ok(removed)
    }

    /// Remove the raw, prepared and meta trees. The data root itself and
    /// anything else inside it are left alone.
    pub fn purge_all(&self) -> Result<(), DataError> {
        for root in self.layout.managed_roots() {
            if remove_tree(&root)? {
                debug!(dir = %root.display(), "purged");
            }
        }
        info!(root = %self.layout.root().display(), "purged all cached datasets");
        Ok(())
    }

    /// Re-hash raw files and compare with the stored manifest.
    pub fn verify(&self, id: &str) -> Result<VerifyReport, DataError> {
        validate_dataset_id(id).map_err(DataError::InvalidConfiguration)?;
        let manifest_path = self.layout.checksums_path(id);
        if !manifest_path.is_file() {
            return Err(DataError::NotFound(format!(
                "no checksum manifest for '{id}'; download it first"
            )));
        }
        let manifest = ChecksumManifest::read(&manifest_path)?;
        manifest.verify(&self.layout.raw_dir(id))
    }
}

fn remove_tree(path: &Path) -> Result<bool, DataError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DataError::io(path, e)),
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
