//! Raw → prepared conversion.
//!
//! `prepare` rebuilds `prepared/<id>` from scratch: every recognized raw file
//! (or every user table of a database file) is optionally sampled, optionally
//! split, and written as parquet. A file that cannot be read is logged and
//! skipped; the run succeeds when at least one table was written.

use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::readers::{read_tables, RawFormat};
use crate::sampling::{sample_stratified, sample_uniform, train_test_split, validate_fraction};
use retaildata_core::cache::DataLayout;
use retaildata_core::registry::validate_dataset_id;
use retaildata_core::DataError;

/// How raw tables are reduced before being written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrepareOptions {
    /// Keep this fraction of rows, in `(0, 1]`.
    pub sample_fraction: Option<f64>,
    /// Sample within each value of this column. Ignored (uniform sampling)
    /// for tables that lack it.
    pub stratify_column: Option<String>,
    /// Train share of a shuffled split, in `(0, 1]`.
    pub split_fraction: Option<f64>,
    /// Fixed seed for reproducible sampling and shuffling.
    pub seed: Option<u64>,
}

impl PrepareOptions {
    pub fn validate(&self) -> Result<(), DataError> {
        if let Some(f) = self.sample_fraction {
            validate_fraction("sample fraction", f)?;
        }
        if let Some(f) = self.split_fraction {
            validate_fraction("split fraction", f)?;
        }
        Ok(())
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// A raw file that produced no output.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrepareReport {
    /// Parquet files written, in write order.
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

impl PrepareReport {
    pub fn succeeded(&self) -> bool {
        !self.written.is_empty()
    }
}

pub struct ProcessingManager {
    layout: DataLayout,
}

impl ProcessingManager {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn prepare(&self, id: &str, options: &PrepareOptions) -> Result<PrepareReport, DataError> {
        validate_dataset_id(id).map_err(DataError::InvalidConfiguration)?;
        options.validate()?;

        let raw = self.layout.raw_dir(id);
        if !raw.is_dir() {
            return Err(DataError::NotFound(format!(
                "raw data for '{id}' not found at {}",
                raw.display()
            )));
        }
        let target = self.layout.prepared_dir(id);
        if target.exists() {
            fs::remove_dir_all(&target).map_err(|e| DataError::io(&target, e))?;
        }
        fs::create_dir_all(&target).map_err(|e| DataError::io(&target, e))?;

        let mut rng = options.rng();
        let mut report = PrepareReport::default();
        for entry in WalkDir::new(&raw).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "unreadable entry under raw directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(format) = RawFormat::detect(path) else {
                debug!(file = %path.display(), "not a tabular file, ignored");
                continue;
            };

            let tables = match read_tables(path, format) {
                Ok(tables) => tables,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "skipping unreadable file");
                    report.skipped.push(SkippedFile {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            for (stem, df) in tables {
                match write_table(df, &stem, options, &mut rng, &target) {
                    Ok(paths) => report.written.extend(paths),
                    Err(e) => {
                        error!(file = %path.display(), table = %stem, error = %e, "skipping table");
                        report.skipped.push(SkippedFile {
                            path: path.to_path_buf(),
                            reason: format!("{stem}: {e}"),
                        });
                    }
                }
            }
        }

        if report.succeeded() {
            info!(
                dataset = id,
                written = report.written.len(),
                skipped = report.skipped.len(),
                "prepared dataset"
            );
        } else {
            warn!(dataset = id, "no tables could be prepared");
        }
        Ok(report)
    }
}

fn write_table(
    df: DataFrame,
    stem: &str,
    options: &PrepareOptions,
    rng: &mut StdRng,
    target: &Path,
) -> Result<Vec<PathBuf>, DataError> {
    let df = match options.sample_fraction {
        None => df,
        Some(fraction) => match options.stratify_column.as_deref() {
            Some(column) if df.column(column).is_ok() => {
                sample_stratified(&df, column, fraction, rng)?
            }
            Some(column) => {
                warn!(table = stem, column, "stratify column absent, sampling uniformly");
                sample_uniform(&df, fraction, rng)?
            }
            None => sample_uniform(&df, fraction, rng)?,
        },
    };

    match options.split_fraction {
        Some(fraction) => {
            let mut split = train_test_split(&df, fraction, rng)?;
            let train = target.join(format!("{stem}_train.parquet"));
            let test = target.join(format!("{stem}_test.parquet"));
            write_parquet_atomic(&mut split.train, &train)?;
            write_parquet_atomic(&mut split.test, &test)?;
            Ok(vec![train, test])
        }
        None => {
            let mut df = df;
            let path = target.join(format!("{stem}.parquet"));
            write_parquet_atomic(&mut df, &path)?;
            Ok(vec![path])
        }
    }
}

/// Write to a sibling temp file and rename it into place.
pub fn write_parquet_atomic(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp).map_err(|e| DataError::io(&tmp, e))?;
    if let Err(e) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&tmp);
        return Err(DataError::Table(format!("write {}: {e}", path.display())));
    }
    fs::rename(&tmp, path).map_err(|e| DataError::io(path, e))?;
    debug!(file = %path.display(), rows = df.height(), "wrote parquet");
    Ok(())
}
