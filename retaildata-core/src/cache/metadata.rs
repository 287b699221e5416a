//! Download records and content manifests.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::DataError;
use crate::registry::ProviderKind;

/// Record written to `meta/<id>/metadata.json` once a dataset is fully acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadataRecord {
    pub id: String,
    pub provider: ProviderKind,
    pub downloaded_at: DateTime<Utc>,
    pub source_url: String,
    /// Provider-specific keys, flattened into the top-level object.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DatasetMetadataRecord {
    pub fn new(id: impl Into<String>, provider: ProviderKind, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            downloaded_at: Utc::now(),
            source_url: source_url.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, serde_json::Value>) -> Self {
        self.extra.extend(extra);
        self
    }

    pub fn write(&self, path: &Path) -> Result<(), DataError> {
        write_json_atomic(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, DataError> {
        read_json(path)
    }
}

/// Relative path (`/`-separated) → BLAKE3 hex digest, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumManifest {
    files: BTreeMap<String, String>,
}

impl ChecksumManifest {
    /// Hash every regular file under `base`. A missing directory yields an
    /// empty manifest.
    pub fn compute(base: &Path) -> Result<Self, DataError> {
        let mut files = BTreeMap::new();
        if !base.exists() {
            return Ok(Self { files });
        }
        for entry in WalkDir::new(base).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.to_path_buf());
                DataError::io(path, io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_key(base, entry.path());
            files.insert(relative, hash_file(entry.path())?);
        }
        Ok(Self { files })
    }

    pub fn get(&self, relative: &str) -> Option<&str> {
        self.files.get(relative).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<(), DataError> {
        write_json_atomic(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, DataError> {
        read_json(path)
    }

    /// Compare this manifest against the current contents of `base`.
    pub fn verify(&self, base: &Path) -> Result<VerifyReport, DataError> {
        let current = Self::compute(base)?;
        let mut report = VerifyReport {
            checked: self.files.len(),
            ..VerifyReport::default()
        };
        for (path, digest) in &self.files {
            match current.files.get(path) {
                Some(actual) if actual == digest => {}
                Some(_) => report.mismatched.push(path.clone()),
                None => report.missing.push(path.clone()),
            }
        }
        report.unexpected = current
            .files
            .keys()
            .filter(|path| !self.files.contains_key(*path))
            .cloned()
            .collect();
        Ok(report)
    }
}

/// Outcome of checking files against their manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// BLAKE3 of a file's contents, streamed.
pub fn hash_file(path: &Path) -> Result<String, DataError> {
    let mut file = File::open(path).map_err(|e| DataError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(|e| DataError::io(path, e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn relative_key(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Serialize as pretty JSON to `<path>.tmp`, then rename into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DataError::Cache(format!("serialize {}: {e}", path.display())))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json).map_err(|e| DataError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DataError::io(path, e)
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, DataError> {
    let content = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| DataError::malformed(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_flattens_extra_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("kaggle_id".to_string(), json!("c/m5-forecasting-accuracy"));
        let record =
            DatasetMetadataRecord::new("m5", ProviderKind::Kaggle, "https://kaggle.com/c/m5")
                .with_extra(extra);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kaggle_id"], "c/m5-forecasting-accuracy");
        assert_eq!(value["provider"], "kaggle");
        assert!(value["downloaded_at"].as_str().unwrap().contains('T'));

        let back: DatasetMetadataRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn manifest_uses_relative_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("a.csv"), "x,y\n1,2\n").unwrap();
        fs::write(dir.path().join("nested/deeper/b.csv"), "z\n3\n").unwrap();

        let manifest = ChecksumManifest::compute(dir.path()).unwrap();
        let keys: Vec<_> = manifest.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a.csv", "nested/deeper/b.csv"]);
        assert_eq!(manifest.get("a.csv").unwrap().len(), 64);
    }

    #[test]
    fn verify_reports_each_kind_of_drift() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.csv"), "1").unwrap();
        fs::write(dir.path().join("edit.csv"), "2").unwrap();
        fs::write(dir.path().join("gone.csv"), "3").unwrap();
        let manifest = ChecksumManifest::compute(dir.path()).unwrap();
        assert!(manifest.verify(dir.path()).unwrap().is_clean());

        fs::write(dir.path().join("edit.csv"), "changed").unwrap();
        fs::remove_file(dir.path().join("gone.csv")).unwrap();
        fs::write(dir.path().join("new.csv"), "4").unwrap();

        let report = manifest.verify(dir.path()).unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.mismatched, vec!["edit.csv"]);
        assert_eq!(report.missing, vec!["gone.csv"]);
        assert_eq!(report.unexpected, vec!["new.csv"]);
    }

    #[test]
    fn missing_directory_is_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ChecksumManifest::compute(&dir.path().join("absent")).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn atomic_write_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/x/checksums.json");
        ChecksumManifest::default().write(&path).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("meta/x/checksums.json.tmp").exists());
        assert!(ChecksumManifest::read(&path).unwrap().is_empty());
    }
}
