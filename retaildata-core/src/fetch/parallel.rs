//! Bounded parallel downloads.
//!
//! Each batch runs on a private rayon pool of `workers` threads, so at most
//! `workers` transfers are in flight. A failed job is recorded in its
//! outcome and never cancels its siblings.

use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::{Fetch, FetchJob};
use super::progress::FetchProgress;
use crate::error::DataError;

pub const DEFAULT_WORKERS: usize = 4;

/// Result of one job in a batch.
#[derive(Debug)]
pub struct FetchOutcome {
    pub job: FetchJob,
    /// Bytes written, or why the transfer failed.
    pub result: Result<u64, DataError>,
}

/// Outcomes of a batch, in job order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }

    /// `(url, error)` for every failed job.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &DataError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.job.url.as_str(), e)))
    }

    /// One-line summary of the failures, for error messages.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|(url, e)| format!("{url}: {e}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runs fetch jobs on a bounded worker pool.
pub struct ParallelFetcher {
    fetch: Arc<dyn Fetch>,
    workers: usize,
}

impl ParallelFetcher {
    pub fn new(fetch: Arc<dyn Fetch>, workers: usize) -> Self {
        Self {
            fetch,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Download a single file on the calling thread.
    pub fn fetch_one(&self, job: &FetchJob, progress: &dyn FetchProgress) -> Result<u64, DataError> {
        progress.on_start(&job.url, 0, 1);
        let result = self.fetch.fetch_to(job, progress);
        progress.on_complete(&job.url, 0, 1, &result);
        result
    }

    /// Download every job, waiting for all of them. Per-job failures land in
    /// the report; only pool construction can fail the call itself.
    pub fn fetch_all(
        &self,
        jobs: Vec<FetchJob>,
        progress: &dyn FetchProgress,
    ) -> Result<BatchReport, DataError> {
        let total = jobs.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("retaildata-fetch-{i}"))
            .build()
            .map_err(|e| DataError::InvalidConfiguration(format!("fetch pool: {e}")))?;
        debug!(jobs = total, workers = self.workers, "starting batch download");

        let outcomes: Vec<FetchOutcome> = pool.install(|| {
            jobs.into_par_iter()
                .enumerate()
                .map(|(index, job)| {
                    progress.on_start(&job.url, index, total);
                    let result = self.fetch.fetch_to(&job, progress);
                    if let Err(e) = &result {
                        warn!(url = %job.url, error = %e, "download failed");
                    }
                    progress.on_complete(&job.url, index, total, &result);
                    FetchOutcome { job, result }
                })
                .collect()
        });

        let report = BatchReport { outcomes };
        progress.on_batch_complete(report.succeeded(), report.failed(), total);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::NoProgress;
    use std::path::PathBuf;

    struct Echo;

    impl Fetch for Echo {
        fn fetch_to(&self, job: &FetchJob, _: &dyn FetchProgress) -> Result<u64, DataError> {
            if job.url.contains("broken") {
                return Err(DataError::remote(&job.url, "HTTP 500"));
            }
            Ok(job.url.len() as u64)
        }
    }

    fn job(url: &str) -> FetchJob {
        FetchJob::new(url, PathBuf::from("/dev/null"))
    }

    #[test]
    fn empty_batch_is_empty_report() {
        let fetcher = ParallelFetcher::new(Arc::new(Echo), 4);
        let report = fetcher.fetch_all(vec![], &NoProgress).unwrap();
        assert_eq!(report.total(), 0);
        assert!(report.all_succeeded());
    }

    #[test]
    fn failures_are_isolated_and_ordered() {
        let fetcher = ParallelFetcher::new(Arc::new(Echo), 2);
        let report = fetcher
            .fetch_all(
                vec![job("https://a/1"), job("https://a/broken"), job("https://a/3")],
                &NoProgress,
            )
            .unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[1].job.url, "https://a/broken");
        assert!(report.failure_summary().contains("https://a/broken"));
        assert_eq!(report.bytes(), 22);
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(ParallelFetcher::new(Arc::new(Echo), 0).workers(), 1);
    }
}
