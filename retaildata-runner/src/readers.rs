//! Raw file readers.
//!
//! Every recognized raw file becomes one or more named tables. Databases
//! contribute one table per user table; everything else contributes a
//! single table named after the file stem.

use calamine::{open_workbook_auto, Data, Range, Reader};
use duckdb::{AccessMode, Config, Connection};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use retaildata_core::DataError;

/// Formats the processing manager knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    Csv,
    Tsv,
    Parquet,
    Spreadsheet,
    Database,
}

impl RawFormat {
    /// Detect by extension, case-insensitively. `None` means the file is ignored.
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "tsv" | "tab" => Some(Self::Tsv),
            "parquet" | "pq" => Some(Self::Parquet),
            "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => Some(Self::Spreadsheet),
            "duckdb" | "ddb" => Some(Self::Database),
            _ => None,
        }
    }
}

/// Read every table contained in `path`.
pub fn read_tables(path: &Path, format: RawFormat) -> Result<Vec<(String, DataFrame)>, DataError> {
    let stem = || {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string())
    };
    match format {
        RawFormat::Csv => Ok(vec![(stem(), read_delimited(path, b',')?)]),
        RawFormat::Tsv => Ok(vec![(stem(), read_delimited(path, b'\t')?)]),
        RawFormat::Parquet => Ok(vec![(stem(), read_parquet(path)?)]),
        RawFormat::Spreadsheet => Ok(vec![(stem(), read_spreadsheet(path)?)]),
        RawFormat::Database => read_database(path),
    }
}

pub fn read_delimited(path: &Path, separator: u8) -> Result<DataFrame, DataError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .with_ignore_errors(true)
        .map_parse_options(|o| o.with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .and_then(|reader| reader.finish())
        .map_err(|e| DataError::malformed(path, e))
}

pub fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = File::open(path).map_err(|e| DataError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::malformed(path, e))
}

/// First worksheet. A column whose non-empty cells are all numeric becomes
/// `f64`; anything else is read as text.
pub fn read_spreadsheet(path: &Path) -> Result<DataFrame, DataError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| DataError::malformed(path, e))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DataError::malformed(path, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| DataError::malformed(path, e))?;
    frame_from_range(&range).map_err(|e| DataError::malformed(path, e))
}

fn frame_from_range(range: &Range<Data>) -> PolarsResult<DataFrame> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let names = column_names(header);
    let body: Vec<&[Data]> = rows.collect();

    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let cells: Vec<Option<&Data>> = body.iter().map(|row| row.get(i)).collect();
            let numeric = cells.iter().flatten().any(|c| !matches!(c, Data::Empty))
                && cells
                    .iter()
                    .flatten()
                    .all(|c| matches!(c, Data::Empty | Data::Int(_) | Data::Float(_)));
            if numeric {
                let values: Vec<Option<f64>> = cells
                    .iter()
                    .map(|c| match c {
                        Some(Data::Int(v)) => Some(*v as f64),
                        Some(Data::Float(v)) => Some(*v),
                        _ => None,
                    })
                    .collect();
                Column::new(name.into(), values)
            } else {
                let values: Vec<Option<String>> =
                    cells.iter().map(|c| c.and_then(cell_text)).collect();
                Column::new(name.into(), values)
            }
        })
        .collect();
    DataFrame::new(columns)
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(v) => Some(v.to_string()),
        Data::Float(v) => Some(v.to_string()),
        Data::Bool(v) => Some(v.to_string()),
        Data::DateTime(v) => Some(v.as_f64().to_string()),
    }
}

/// Header cells as unique, non-empty column names.
fn column_names(header: &[Data]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    header
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let base = cell_text(cell)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("column_{i}"));
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}_{}", *count - 1)
            }
        })
        .collect()
}

/// Every table in the `main` schema whose name does not start with `_`.
/// Tables are exported through DuckDB's parquet writer into a scratch
/// directory and read back, so column types survive.
pub fn read_database(path: &Path) -> Result<Vec<(String, DataFrame)>, DataError> {
    let config = Config::default()
        .access_mode(AccessMode::ReadOnly)
        .map_err(|e| DataError::malformed(path, e))?;
    let conn =
        Connection::open_with_flags(path, config).map_err(|e| DataError::malformed(path, e))?;
    let tables = user_tables(&conn).map_err(|e| DataError::malformed(path, e))?;

    let scratch = tempfile::tempdir().map_err(|e| DataError::io(path, e))?;
    let mut frames = Vec::with_capacity(tables.len());
    for table in tables {
        let export = scratch.path().join(format!("{}.parquet", frames.len()));
        conn.execute_batch(&format!(
            "COPY (SELECT * FROM {}) TO {} (FORMAT PARQUET)",
            quote_ident(&table),
            quote_literal(&export.to_string_lossy())
        ))
        .map_err(|e| DataError::malformed(path, format!("table {table}: {e}")))?;
        debug!(table = %table, "exported database table");
        frames.push((table, read_parquet(&export)?));
    }
    Ok(frames)
}

fn user_tables(conn: &Connection) -> duckdb::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' ORDER BY table_name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(names.into_iter().filter(|n| !n.starts_with('_')).collect())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
