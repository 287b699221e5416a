//! Kaggle datasets and competitions.
//!
//! References of the form `c/<name>` are competitions; anything else is an
//! `owner/slug` dataset. Kaggle serves both as a zip archive, which is
//! downloaded to staging and extracted into the destination.

use reqwest::blocking::Client;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use zip::ZipArchive;

use super::{locator_mismatch, require_secret, AcquireContext, Acquisition, DatasetProvider};
use crate::credentials::CredentialManager;
use crate::error::DataError;
use crate::fetch::http::{send_checked, stream_to_file};
use crate::fetch::FetchProgress;
use crate::registry::{DatasetDescriptor, Locator, ProviderKind};

pub const KAGGLE_SERVICE: &str = "kaggle";
pub const KAGGLE_API: &str = "https://www.kaggle.com/api/v1";

/// A parsed Kaggle reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KaggleTarget {
    Competition(String),
    Dataset { owner: String, slug: String },
}

impl KaggleTarget {
    pub fn parse(reference: &str) -> Result<Self, DataError> {
        let invalid = || {
            DataError::InvalidConfiguration(format!(
                "kaggle reference '{reference}' must be 'owner/slug' or 'c/<competition>'"
            ))
        };
        let (head, tail) = reference.trim().split_once('/').ok_or_else(invalid)?;
        if head.is_empty() || tail.is_empty() || tail.contains('/') {
            return Err(invalid());
        }
        if head == "c" {
            Ok(KaggleTarget::Competition(tail.to_string()))
        } else {
            Ok(KaggleTarget::Dataset {
                owner: head.to_string(),
                slug: tail.to_string(),
            })
        }
    }

    /// Human-facing page for the metadata record.
    pub fn source_url(&self) -> String {
        match self {
            KaggleTarget::Competition(name) => format!("https://www.kaggle.com/c/{name}"),
            KaggleTarget::Dataset { owner, slug } => {
                format!("https://www.kaggle.com/datasets/{owner}/{slug}")
            }
        }
    }

    fn archive_name(&self) -> String {
        match self {
            KaggleTarget::Competition(name) => format!("{name}.zip"),
            KaggleTarget::Dataset { slug, .. } => format!("{slug}.zip"),
        }
    }
}

/// API username and key.
#[derive(Clone)]
pub struct KaggleAuth {
    pub username: String,
    pub key: String,
}

impl fmt::Debug for KaggleAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KaggleAuth")
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Remote side of the Kaggle backend.
pub trait KaggleApi: Send + Sync {
    /// Download the target's archive to `archive`.
    fn download(
        &self,
        target: &KaggleTarget,
        auth: &KaggleAuth,
        archive: &Path,
        progress: &dyn FetchProgress,
    ) -> Result<(), DataError>;
}

/// Kaggle public API v1 with basic authentication.
pub struct KaggleHttpApi {
    client: Client,
    base_url: String,
}

impl KaggleHttpApi {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, KAGGLE_API)
    }

    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn download_url(&self, target: &KaggleTarget) -> String {
        match target {
            KaggleTarget::Competition(name) => {
                format!("{}/competitions/data/download-all/{name}", self.base_url)
            }
            KaggleTarget::Dataset { owner, slug } => {
                format!("{}/datasets/download/{owner}/{slug}", self.base_url)
            }
        }
    }
}

impl KaggleApi for KaggleHttpApi {
    fn download(
        &self,
        target: &KaggleTarget,
        auth: &KaggleAuth,
        archive: &Path,
        progress: &dyn FetchProgress,
    ) -> Result<(), DataError> {
        let url = self.download_url(target);
        let request = self
            .client
            .get(&url)
            .basic_auth(&auth.username, Some(&auth.key));
        let response = send_checked(request, &url)?;
        progress.on_start(&url, 0, 1);
        let result = stream_to_file(&url, response, archive, progress);
        progress.on_complete(&url, 0, 1, &result);
        result.map(|_| ())
    }
}

/// Kaggle backend. Credentials are checked before any network call.
pub struct KaggleProvider {
    credentials: Arc<CredentialManager>,
    api: Box<dyn KaggleApi>,
}

impl KaggleProvider {
    pub fn new(credentials: Arc<CredentialManager>, api: Box<dyn KaggleApi>) -> Self {
        Self { credentials, api }
    }

    fn auth(&self) -> Result<KaggleAuth, DataError> {
        Ok(KaggleAuth {
            username: require_secret(&self.credentials, KAGGLE_SERVICE, "username")?,
            key: require_secret(&self.credentials, KAGGLE_SERVICE, "key")?,
        })
    }
}

impl DatasetProvider for KaggleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kaggle
    }

    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        let Locator::Kaggle(reference) = &descriptor.locator else {
            return Err(locator_mismatch(descriptor, "a kaggle reference"));
        };
        let target = KaggleTarget::parse(reference)?;
        let auth = self.auth()?;

        let archive = ctx.staging.join(target.archive_name());
        self.api.download(&target, &auth, &archive, ctx.progress)?;
        let files = unpack_archive(&archive, ctx.destination)?;
        info!(dataset = %descriptor.id, files, "extracted kaggle archive");

        let kind = match target {
            KaggleTarget::Competition(_) => "competition",
            KaggleTarget::Dataset { .. } => "dataset",
        };
        Ok(Acquisition::new(target.source_url())
            .with_extra("kaggle_id", reference.as_str())
            .with_extra("kaggle_kind", kind))
    }
}

const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Extract a zip archive into `destination` and delete it. A non-zip file
/// (single-file downloads) is moved into `destination` as is. Returns the
/// number of files placed.
pub(crate) fn unpack_archive(archive: &Path, destination: &Path) -> Result<usize, DataError> {
    fs::create_dir_all(destination).map_err(|e| DataError::io(destination, e))?;
    if !is_zip(archive)? {
        let name = archive
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| "download".into());
        let target = destination.join(name);
        fs::rename(archive, &target).map_err(|e| DataError::io(&target, e))?;
        return Ok(1);
    }

    let file = File::open(archive).map_err(|e| DataError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| DataError::malformed(archive, e))?;
    let count = zip.file_names().filter(|name| !name.ends_with('/')).count();
    zip.extract(destination)
        .map_err(|e| DataError::malformed(archive, e))?;
    fs::remove_file(archive).map_err(|e| DataError::io(archive, e))?;
    Ok(count)
}

fn is_zip(path: &Path) -> Result<bool, DataError> {
    let mut file = File::open(path).map_err(|e| DataError::io(path, e))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(DataError::io(path, e)),
    }
}
