//! File transfer: a single-download seam, a bounded parallel fetcher and
//! progress reporting.

pub mod http;
pub mod parallel;
pub mod progress;

pub use http::{file_name_from_url, unique_file_names, Fetch, FetchJob, HttpFetcher};
pub use parallel::{BatchReport, FetchOutcome, ParallelFetcher, DEFAULT_WORKERS};
pub use progress::{multi_progress, BarProgress, FetchProgress, NoProgress};
