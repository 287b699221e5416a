//! Repositories that serve one table per dataset (UCI, OpenML).
//!
//! The remote side returns DataFrames; this backend only writes them:
//! `features.csv` + `targets.csv` when targets are known, `data.csv` otherwise.

use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::{locator_mismatch, AcquireContext, Acquisition, DatasetProvider};
use crate::error::DataError;
use crate::registry::{DatasetDescriptor, Locator, ProviderKind};

/// One fetched table, split into features and optional targets.
#[derive(Debug, Clone)]
pub struct TabularFetch {
    pub features: DataFrame,
    pub targets: Option<DataFrame>,
    pub source_url: String,
    pub extra: BTreeMap<String, Value>,
}

/// Remote side of a tabular repository.
pub trait TabularApi: Send + Sync {
    fn fetch(&self, dataset_id: u32) -> Result<TabularFetch, DataError>;
}

/// Backend for numeric-id tabular repositories.
pub struct TabularProvider {
    kind: ProviderKind,
    api: Box<dyn TabularApi>,
}

impl TabularProvider {
    pub fn uci(api: Box<dyn TabularApi>) -> Self {
        Self {
            kind: ProviderKind::Uci,
            api,
        }
    }

    pub fn openml(api: Box<dyn TabularApi>) -> Self {
        Self {
            kind: ProviderKind::OpenMl,
            api,
        }
    }

    fn dataset_id(&self, descriptor: &DatasetDescriptor) -> Result<u32, DataError> {
        match (self.kind, &descriptor.locator) {
            (ProviderKind::Uci, Locator::UciId(id)) | (ProviderKind::OpenMl, Locator::OpenMlId(id)) => {
                Ok(*id)
            }
            (ProviderKind::Uci, _) => Err(locator_mismatch(descriptor, "a uci_id")),
            _ => Err(locator_mismatch(descriptor, "an openml_id")),
        }
    }
}

impl DatasetProvider for TabularProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        let id = self.dataset_id(descriptor)?;
        let TabularFetch {
            mut features,
            targets,
            source_url,
            extra,
        } = self.api.fetch(id)?;

        let mut files = Vec::new();
        match targets {
            Some(mut targets) => {
                files.push(write_csv(&mut features, &ctx.destination.join("features.csv"))?);
                files.push(write_csv(&mut targets, &ctx.destination.join("targets.csv"))?);
            }
            None => files.push(write_csv(&mut features, &ctx.destination.join("data.csv"))?),
        }

        let mut acquisition = Acquisition::new(source_url)
            .with_extra(format!("{}_id", self.kind), id)
            .with_extra("rows", features.height())
            .with_extra(
                "files",
                files
                    .iter()
                    .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                    .collect::<Vec<_>>(),
            );
        acquisition.extra.extend(extra);
        Ok(acquisition)
    }
}

fn write_csv(df: &mut DataFrame, path: &Path) -> Result<PathBuf, DataError> {
    let mut file = File::create(path).map_err(|e| DataError::io(path, e))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .map_err(|e| DataError::Table(format!("write {}: {e}", path.display())))?;
    Ok(path.to_path_buf())
}

/// Parse a CSV body held in memory.
pub(crate) fn read_csv_bytes(bytes: Vec<u8>, origin: &str) -> Result<DataFrame, DataError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|e| DataError::malformed(origin, e))
}

/// Split `df` into (features, targets) by column name. Names not present in
/// the frame are ignored; no targets means `None`.
pub(crate) fn split_targets(
    df: DataFrame,
    target_names: &[String],
) -> Result<(DataFrame, Option<DataFrame>), DataError> {
    let present: Vec<String> = target_names
        .iter()
        .filter(|name| df.column(name).is_ok())
        .cloned()
        .collect();
    if present.is_empty() {
        return Ok((df, None));
    }
    let targets = df
        .select(present.iter().map(String::as_str))
        .map_err(|e| DataError::Table(e.to_string()))?;
    let features = df.drop_many(present.iter().map(String::as_str));
    Ok((features, Some(targets)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_named_targets() {
        let df = read_csv_bytes(b"a,b,class\n1,2,x\n3,4,y\n".to_vec(), "test").unwrap();
        let (features, targets) = split_targets(df, &["class".into(), "absent".into()]).unwrap();
        assert_eq!(features.get_column_names_str(), vec!["a", "b"]);
        assert_eq!(targets.unwrap().get_column_names_str(), vec!["class"]);
    }

    #[test]
    fn no_targets_keeps_frame() {
        let df = read_csv_bytes(b"a,b\n1,2\n".to_vec(), "test").unwrap();
        let (features, targets) = split_targets(df, &[]).unwrap();
        assert_eq!(features.width(), 2);
        assert!(targets.is_none());
    }
}
