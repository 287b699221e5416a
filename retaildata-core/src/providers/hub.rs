//! Dataset hub repositories (Hugging Face compatible API).
//!
//! The repository tree is listed once, filtered by include/exclude globs and
//! every selected file is downloaded through the parallel fetcher with its
//! relative path preserved.

use globset::{Glob, GlobSet, GlobSetBuilder};
use reqwest::blocking::Client;
use reqwest::header::LINK;
use serde::Deserialize;
use std::path::{Component, Path};
use std::sync::Arc;

use super::{locator_mismatch, optional_secret, AcquireContext, Acquisition, DatasetProvider};
use crate::credentials::CredentialManager;
use crate::error::DataError;
use crate::fetch::http::send_checked;
use crate::fetch::{FetchJob, ParallelFetcher};
use crate::registry::{DatasetDescriptor, Locator, ProviderKind};

pub const HUB_SERVICE: &str = "huggingface";
pub const DEFAULT_REVISION: &str = "main";

/// A file in a hub repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubFile {
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Remote side of the hub backend.
pub trait HubApi: Send + Sync {
    fn list_files(
        &self,
        repo: &str,
        revision: &str,
        token: Option<&str>,
    ) -> Result<Vec<HubFile>, DataError>;

    /// Direct download URL of one file.
    fn file_url(&self, repo: &str, revision: &str, path: &str) -> String;

    fn repo_url(&self, repo: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Hub HTTP API: paginated tree listing plus `resolve` downloads.
pub struct HubHttpApi {
    client: Client,
    endpoint: String,
}

impl HubHttpApi {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

impl HubApi for HubHttpApi {
    fn list_files(
        &self,
        repo: &str,
        revision: &str,
        token: Option<&str>,
    ) -> Result<Vec<HubFile>, DataError> {
        let mut url = Some(format!(
            "{}/api/datasets/{repo}/tree/{revision}?recursive=true",
            self.endpoint
        ));
        let mut files = Vec::new();
        while let Some(page) = url.take() {
            let mut request = self.client.get(&page);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = send_checked(request, &page)?;
            url = next_link(response.headers().get(LINK).and_then(|v| v.to_str().ok()));
            let entries: Vec<TreeEntry> = response
                .json()
                .map_err(|e| DataError::remote(&page, format!("unexpected tree listing: {e}")))?;
            files.extend(
                entries
                    .into_iter()
                    .filter(|e| e.kind == "file")
                    .map(|e| HubFile {
                        path: e.path,
                        size: e.size,
                    }),
            );
        }
        Ok(files)
    }

    fn file_url(&self, repo: &str, revision: &str, path: &str) -> String {
        format!("{}/datasets/{repo}/resolve/{revision}/{path}", self.endpoint)
    }

    fn repo_url(&self, repo: &str) -> String {
        format!("{}/datasets/{repo}", self.endpoint)
    }
}

/// `rel="next"` target of an RFC 8288 Link header.
fn next_link(header: Option<&str>) -> Option<String> {
    header?
        .split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            (start < end).then(|| part[start..end].to_string())
        })
}

/// Include/exclude glob filter over repository paths.
struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PathFilter {
    fn new(include: &[String], exclude: &[String]) -> Result<Self, DataError> {
        Ok(Self {
            include: build_globs(include)?,
            exclude: build_globs(exclude)?,
        })
    }

    fn matches(&self, path: &str) -> bool {
        self.include.as_ref().map_or(true, |g| g.is_match(path))
            && !self.exclude.as_ref().map_or(false, |g| g.is_match(path))
    }
}

fn build_globs(patterns: &[String]) -> Result<Option<GlobSet>, DataError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            DataError::InvalidConfiguration(format!("invalid pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| DataError::InvalidConfiguration(format!("invalid patterns: {e}")))
}

/// Repository paths must stay inside the destination.
fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Hub backend. A token is used when stored, never required.
pub struct HubProvider {
    credentials: Arc<CredentialManager>,
    api: Box<dyn HubApi>,
    fetcher: Arc<ParallelFetcher>,
}

impl HubProvider {
    pub fn new(
        credentials: Arc<CredentialManager>,
        api: Box<dyn HubApi>,
        fetcher: Arc<ParallelFetcher>,
    ) -> Self {
        Self {
            credentials,
            api,
            fetcher,
        }
    }
}

impl DatasetProvider for HubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        let Locator::HubRepo(repo) = &descriptor.locator else {
            return Err(locator_mismatch(descriptor, "a hub repository"));
        };
        let revision = ctx.options.revision.as_deref().unwrap_or(DEFAULT_REVISION);
        let filter = PathFilter::new(&ctx.options.include_patterns, &ctx.options.exclude_patterns)?;
        let token = optional_secret(&self.credentials, HUB_SERVICE, "token");

        let listed = self.api.list_files(repo, revision, token.as_deref())?;
        let selected: Vec<HubFile> = listed
            .into_iter()
            .filter(|f| filter.matches(&f.path))
            .collect();
        if selected.is_empty() {
            return Err(DataError::NotFound(format!(
                "no files in {repo}@{revision} match the requested patterns"
            )));
        }
        if let Some(bad) = selected.iter().find(|f| !is_safe_relative(&f.path)) {
            return Err(DataError::remote(
                repo.as_str(),
                format!("refusing unsafe repository path '{}'", bad.path),
            ));
        }

        let jobs = selected
            .iter()
            .map(|f| {
                FetchJob::new(
                    self.api.file_url(repo, revision, &f.path),
                    ctx.destination.join(&f.path),
                )
                .with_bearer(token.clone())
            })
            .collect();
        let report = self.fetcher.fetch_all(jobs, ctx.progress)?;
        if !report.all_succeeded() {
            return Err(DataError::remote(
                repo.as_str(),
                format!(
                    "{} of {} files failed: {}",
                    report.failed(),
                    report.total(),
                    report.failure_summary()
                ),
            ));
        }

        Ok(Acquisition::new(self.api.repo_url(repo))
            .with_extra("hub_repo", repo.as_str())
            .with_extra("revision", revision)
            .with_extra(
                "files",
                selected.into_iter().map(|f| f.path).collect::<Vec<_>>(),
            ))
    }
}
