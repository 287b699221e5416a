//! RetailData Runner: raw → prepared conversion, sampling, and the
//! application context.
//!
//! This crate builds on `retaildata-core` to provide:
//! - Raw file readers (delimited text, parquet, spreadsheets, DuckDB)
//! - Uniform and stratified sampling, shuffled train/test splits
//! - Date-based splitting of prepared tables
//! - `RetailData`, which owns every service and exposes download, prepare,
//!   load, verify and purge

pub mod processing;
pub mod readers;
pub mod sampling;
pub mod service;
pub mod temporal;

pub use processing::{PrepareOptions, PrepareReport, ProcessingManager, SkippedFile};
pub use readers::RawFormat;
pub use sampling::{sample_stratified, sample_uniform, train_test_split, TrainTest};
pub use service::{DownloadOptions, DownloadOutcome, LoadOptions, RetailData};
pub use temporal::{split_by_date, TemporalSplit};
