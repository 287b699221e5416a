//! Single-file HTTP download.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use super::progress::FetchProgress;
use crate::error::DataError;

pub const USER_AGENT: &str = concat!("retaildata/", env!("CARGO_PKG_VERSION"));
const CHUNK_SIZE: usize = 64 * 1024;

/// One file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub url: String,
    pub dest: PathBuf,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
}

impl FetchJob {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }
}

/// Downloads one URL to a local file.
pub trait Fetch: Send + Sync {
    /// Download `job.url` into `job.dest`, returning the bytes written. The
    /// destination only appears once the transfer has completed.
    fn fetch_to(&self, job: &FetchJob, progress: &dyn FetchProgress) -> Result<u64, DataError>;
}

/// Streaming downloader over a blocking reqwest client. Each job is one
/// request; failures go back to the caller as they are.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// The timeout bounds connection setup only; large bodies may take longer.
    pub fn new(connect_timeout: Duration) -> Result<Self, DataError> {
        Ok(Self::with_client(download_client(connect_timeout)?))
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn send(&self, job: &FetchJob) -> Result<Response, DataError> {
        let mut request = self.client.get(&job.url);
        if let Some(token) = &job.bearer_token {
            request = request.bearer_auth(token);
        }
        send_checked(request, &job.url)
    }
}

impl Fetch for HttpFetcher {
    fn fetch_to(&self, job: &FetchJob, progress: &dyn FetchProgress) -> Result<u64, DataError> {
        let response = self.send(job)?;
        stream_to_file(&job.url, response, &job.dest, progress)
    }
}

/// Client without a total-request timeout, for file bodies.
pub fn download_client(connect_timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::InvalidConfiguration(format!("failed to build HTTP client: {e}")))
}

/// Client with a total-request timeout, for small API responses.
pub fn api_client(timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| DataError::InvalidConfiguration(format!("failed to build HTTP client: {e}")))
}

/// Map non-success statuses to typed errors.
pub fn check_status(url: &str, response: &Response) -> Result<(), DataError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DataError::AuthenticationRequired(format!("{url} returned HTTP {status}"))
        }
        StatusCode::NOT_FOUND => DataError::NotFound(url.to_string()),
        _ => DataError::remote(url, format!("HTTP {status}")),
    })
}

/// Send a request and fail on non-success statuses.
pub fn send_checked(request: RequestBuilder, url: &str) -> Result<Response, DataError> {
    let response = request.send().map_err(|e| DataError::remote(url, e))?;
    check_status(url, &response)?;
    Ok(response)
}

/// Stream a response body to `<dest>.part`, then rename it to `dest`.
pub fn stream_to_file(
    url: &str,
    mut response: Response,
    dest: &Path,
    progress: &dyn FetchProgress,
) -> Result<u64, DataError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
    }
    progress.on_length(url, response.content_length());

    let part = part_path(dest);
    let file = File::create(&part).map_err(|e| DataError::io(&part, e))?;
    let mut writer = BufWriter::new(file);
    let copied = copy_body(url, &mut response, &mut writer, &part, progress);
    drop(writer);

    match copied {
        Ok(written) => {
            fs::rename(&part, dest).map_err(|e| DataError::io(dest, e))?;
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            warn!(url, error = %e, "download interrupted");
            Err(e)
        }
    }
}

fn copy_body(
    url: &str,
    response: &mut Response,
    writer: &mut BufWriter<File>,
    part: &Path,
    progress: &dyn FetchProgress,
) -> Result<u64, DataError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = response
            .read(&mut buf)
            .map_err(|e| DataError::remote(url, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| DataError::io(part, e))?;
        written += n as u64;
        progress.on_bytes(url, n as u64);
    }
    writer.flush().map_err(|e| DataError::io(part, e))?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Last non-empty path segment of a URL, or `"download"`.
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_owned))
        })
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| "download".to_string())
}

/// File names for a list of URLs, suffixing repeats (`a.csv`, `a_1.csv`, ...).
pub fn unique_file_names(urls: &[String]) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    urls.iter()
        .map(|url| {
            let name = file_name_from_url(url);
            let mut candidate = name.clone();
            let mut suffix = 0;
            while !taken.insert(candidate.clone()) {
                suffix += 1;
                candidate = match name.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{suffix}.{ext}"),
                    _ => format!("{name}_{suffix}"),
                };
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_last_segment() {
        assert_eq!(
            file_name_from_url("https://example.com/data/iris.csv?raw=1"),
            "iris.csv"
        );
        assert_eq!(file_name_from_url("https://example.com/data/"), "data");
        assert_eq!(file_name_from_url("https://example.com"), "download");
        assert_eq!(file_name_from_url("not a url"), "download");
    }

    #[test]
    fn repeated_names_get_suffixes() {
        let urls = vec![
            "https://a.com/x/data.csv".to_string(),
            "https://b.com/y/data.csv".to_string(),
            "https://c.com/z/data.csv".to_string(),
            "https://c.com/z/other".to_string(),
        ];
        assert_eq!(
            unique_file_names(&urls),
            vec!["data.csv", "data_1.csv", "data_2.csv", "other"]
        );
    }

    #[test]
    fn suffix_skips_names_already_taken() {
        let urls = vec![
            "https://a.com/a.csv".to_string(),
            "https://a.com/a_1.csv".to_string(),
            "https://b.com/a.csv".to_string(),
        ];
        assert_eq!(unique_file_names(&urls), vec!["a.csv", "a_1.csv", "a_2.csv"]);
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/raw/iris.csv")),
            PathBuf::from("/tmp/raw/iris.csv.part")
        );
    }
}
