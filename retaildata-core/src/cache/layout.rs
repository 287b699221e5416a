//! Path convention under the data root.
//!
//! Layout:
//! - `{root}/raw/{id}/`                  files as acquired
//! - `{root}/prepared/{id}/`             parquet outputs of preparation
//! - `{root}/meta/{id}/metadata.json`    download record (written last)
//! - `{root}/meta/{id}/checksums.json`   content manifest

use std::path::{Path, PathBuf};

pub const RAW_DIR: &str = "raw";
pub const PREPARED_DIR: &str = "prepared";
pub const META_DIR: &str = "meta";
pub const METADATA_FILE: &str = "metadata.json";
pub const CHECKSUMS_FILE: &str = "checksums.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_root(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn prepared_root(&self) -> PathBuf {
        self.root.join(PREPARED_DIR)
    }

    pub fn meta_root(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn raw_dir(&self, id: &str) -> PathBuf {
        self.raw_root().join(id)
    }

    pub fn prepared_dir(&self, id: &str) -> PathBuf {
        self.prepared_root().join(id)
    }

    pub fn meta_dir(&self, id: &str) -> PathBuf {
        self.meta_root().join(id)
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.meta_dir(id).join(METADATA_FILE)
    }

    pub fn checksums_path(&self, id: &str) -> PathBuf {
        self.meta_dir(id).join(CHECKSUMS_FILE)
    }

    /// The three managed roots, in the order they are purged.
    pub fn managed_roots(&self) -> [PathBuf; 3] {
        [self.raw_root(), self.prepared_root(), self.meta_root()]
    }

    /// Every directory belonging to one dataset.
    pub fn dataset_dirs(&self, id: &str) -> [PathBuf; 3] {
        [self.raw_dir(id), self.prepared_dir(id), self.meta_dir(id)]
    }
}
