//! Plain HTTP(S) files.

use std::sync::Arc;

use super::{locator_mismatch, AcquireContext, Acquisition, DatasetProvider};
use crate::error::DataError;
use crate::fetch::{file_name_from_url, unique_file_names, FetchJob, ParallelFetcher};
use crate::registry::{DatasetDescriptor, Locator, ProviderKind};

/// Downloads one URL directly, or several through the parallel fetcher.
pub struct HttpProvider {
    fetcher: Arc<ParallelFetcher>,
}

impl HttpProvider {
    pub fn new(fetcher: Arc<ParallelFetcher>) -> Self {
        Self { fetcher }
    }
}

impl DatasetProvider for HttpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        match &descriptor.locator {
            Locator::Url(url) => {
                let name = file_name_from_url(url);
                let job = FetchJob::new(url, ctx.destination.join(&name));
                let bytes = self.fetcher.fetch_one(&job, ctx.progress)?;
                Ok(Acquisition::new(url.clone())
                    .with_extra("files", vec![name])
                    .with_extra("bytes", bytes))
            }
            Locator::Urls(urls) => {
                let names = unique_file_names(urls);
                let jobs = urls
                    .iter()
                    .zip(&names)
                    .map(|(url, name)| FetchJob::new(url, ctx.destination.join(name)))
                    .collect();
                let report = self.fetcher.fetch_all(jobs, ctx.progress)?;
                if !report.all_succeeded() {
                    return Err(DataError::remote(
                        &descriptor.id,
                        format!(
                            "{} of {} files failed: {}",
                            report.failed(),
                            report.total(),
                            report.failure_summary()
                        ),
                    ));
                }
                Ok(Acquisition::new(urls.join(", "))
                    .with_extra("files", names)
                    .with_extra("bytes", report.bytes()))
            }
            _ => Err(locator_mismatch(descriptor, "a url or urls locator")),
        }
    }
}
