//! The dataset catalog: an insertion-ordered, id-indexed set of descriptors.
//!
//! Built once at startup (built-in catalog plus an optional user catalog)
//! and shared read-only afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use super::descriptor::DatasetDescriptor;

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("dataset id '{0}' is already registered")]
    DuplicateId(String),

    #[error("invalid descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("failed to parse catalog: {0}")]
    Parse(String),

    #[error("failed to read catalog {path}: {reason}")]
    Read { path: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "dataset")]
    datasets: Vec<DatasetDescriptor>,
}

/// Id → descriptor mapping that preserves registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<DatasetDescriptor>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in catalog.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.extend_from_toml(content)?;
        Ok(registry)
    }

    /// Add every `[[dataset]]` entry of a TOML catalog. Ids already present
    /// are rejected; returns the number of descriptors added.
    pub fn extend_from_toml(&mut self, content: &str) -> Result<usize, RegistryError> {
        let catalog: CatalogFile =
            toml::from_str(content).map_err(|e| RegistryError::Parse(e.to_string()))?;
        let count = catalog.datasets.len();
        for descriptor in catalog.datasets {
            self.register(descriptor)?;
        }
        Ok(count)
    }

    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.extend_from_toml(&content)
    }

    /// Register a new descriptor. Fails if the id is taken or the
    /// descriptor is inconsistent.
    pub fn register(&mut self, descriptor: DatasetDescriptor) -> Result<(), RegistryError> {
        check(&descriptor)?;
        if self.index.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateId(descriptor.id));
        }
        self.index.insert(descriptor.id.clone(), self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    /// Register, replacing any descriptor with the same id in place.
    /// Returns the replaced descriptor.
    pub fn register_or_replace(
        &mut self,
        descriptor: DatasetDescriptor,
    ) -> Result<Option<DatasetDescriptor>, RegistryError> {
        check(&descriptor)?;
        match self.index.get(&descriptor.id) {
            Some(&pos) => Ok(Some(std::mem::replace(&mut self.entries[pos], descriptor))),
            None => {
                self.index.insert(descriptor.id.clone(), self.entries.len());
                self.entries.push(descriptor);
                Ok(None)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&DatasetDescriptor> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All descriptors in registration order.
    pub fn list_all(&self) -> &[DatasetDescriptor] {
        &self.entries
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|d| d.id.as_str())
    }

    pub fn filter_by_tag(&self, tag: &str) -> Vec<&DatasetDescriptor> {
        self.entries.iter().filter(|d| d.has_tag(tag)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check(descriptor: &DatasetDescriptor) -> Result<(), RegistryError> {
    descriptor
        .validate()
        .map_err(|reason| RegistryError::InvalidDescriptor {
            id: descriptor.id.clone(),
            reason,
        })
}
