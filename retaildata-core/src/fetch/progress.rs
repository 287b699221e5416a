//! Progress reporting for downloads.
//!
//! Bars are attached to one process-wide `MultiProgress`, so log lines
//! printed through it stay above the bars instead of tearing them.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tracing::info;

use crate::error::DataError;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

/// Shared progress area on stderr.
pub fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// Callback for download progress. Called from worker threads.
pub trait FetchProgress: Send + Sync {
    /// A transfer is about to start (`index` is 0-based).
    fn on_start(&self, url: &str, index: usize, total: usize);

    /// The server announced a content length (if any).
    fn on_length(&self, url: &str, total_bytes: Option<u64>);

    fn on_bytes(&self, url: &str, bytes: u64);

    fn on_complete(&self, url: &str, index: usize, total: usize, result: &Result<u64, DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Silent progress, for tests and library callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _url: &str, _index: usize, _total: usize) {}
    fn on_length(&self, _url: &str, _total_bytes: Option<u64>) {}
    fn on_bytes(&self, _url: &str, _bytes: u64) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<u64, DataError>) {}
    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Terminal progress bars: one byte bar per active transfer plus a file
/// counter for batches.
#[derive(Default)]
pub struct BarProgress {
    transfers: Mutex<HashMap<String, ProgressBar>>,
    batch: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn byte_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner} {msg:30!} {bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn batch_style() -> ProgressStyle {
        ProgressStyle::with_template("files [{bar:30.green/white}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

fn short_name(url: &str) -> String {
    url.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(url)
        .to_string()
}

impl FetchProgress for BarProgress {
    fn on_start(&self, _url: &str, _index: usize, total: usize) {
        if total < 2 {
            return;
        }
        let mut batch = self.batch.lock().unwrap_or_else(|p| p.into_inner());
        if batch.is_none() {
            let bar = multi_progress().add(ProgressBar::new(total as u64));
            bar.set_style(Self::batch_style());
            *batch = Some(bar);
        }
    }

    fn on_length(&self, url: &str, total_bytes: Option<u64>) {
        let bar = match total_bytes {
            Some(len) => {
                let bar = multi_progress().add(ProgressBar::new(len));
                bar.set_style(Self::byte_style());
                bar
            }
            None => {
                let bar = multi_progress().add(ProgressBar::new_spinner());
                bar.set_style(Self::spinner_style());
                bar
            }
        };
        bar.set_message(short_name(url));
        self.transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.to_string(), bar);
    }

    fn on_bytes(&self, url: &str, bytes: u64) {
        let transfers = self.transfers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(bar) = transfers.get(url) {
            bar.inc(bytes);
        }
    }

    fn on_complete(&self, url: &str, _index: usize, _total: usize, result: &Result<u64, DataError>) {
        let bar = self
            .transfers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(url);
        if let Some(bar) = bar {
            bar.finish_and_clear();
            multi_progress().remove(&bar);
        }
        if let Some(batch) = self.batch.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            batch.inc(1);
            if result.is_err() {
                batch.set_message(format!("failed: {}", short_name(url)));
            }
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        if let Some(batch) = self.batch.lock().unwrap_or_else(|p| p.into_inner()).take() {
            batch.finish_and_clear();
            multi_progress().remove(&batch);
        }
        info!(succeeded, failed, total, "batch download finished");
    }
}
