//! Each backend driven through the dispatcher with in-process remotes.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use polars::prelude::*;
use retaildata_core::credentials::{CredentialManager, EncryptedFileStore, KdfParams};
use retaildata_core::fetch::{Fetch, FetchJob, FetchProgress, NoProgress, ParallelFetcher};
use retaildata_core::providers::{
    AcquireOptions, HttpProvider, HubApi, HubFile, HubProvider, KaggleApi, KaggleAuth,
    KaggleProvider, KaggleTarget, LoadedTable, PipelineProvider, PipelineReport,
    PipelineRequest, PipelineRunner, ProviderDispatch, TabularApi, TabularFetch,
    TabularProvider,
};
use retaildata_core::registry::{DatasetDescriptor, Locator, Registry};
use retaildata_core::DataError;

// ── Harness ──

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    credentials: Arc<CredentialManager>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let store = EncryptedFileStore::open(
            root.join("credentials.json"),
            "pw",
            KdfParams::new(1024, 1, 1),
        )
        .unwrap();
        Self {
            _dir: dir,
            root,
            credentials: Arc::new(CredentialManager::with_store(Arc::new(store))),
        }
    }

    fn dest(&self, id: &str) -> PathBuf {
        self.root.join("raw").join(id)
    }

    fn meta(&self) -> PathBuf {
        self.root.join("meta")
    }

    fn dispatch(&self) -> ProviderDispatch {
        ProviderDispatch::empty(self.root.join("staging"))
    }

    fn run(
        &self,
        dispatch: &ProviderDispatch,
        descriptor: &DatasetDescriptor,
        options: &AcquireOptions,
    ) -> Result<retaildata_core::cache::DatasetMetadataRecord, DataError> {
        dispatch.acquire(
            descriptor,
            &self.dest(&descriptor.id),
            &self.meta(),
            options,
            &NoProgress,
        )
    }

    fn has_metadata(&self, id: &str) -> bool {
        self.meta().join(id).join("metadata.json").is_file()
    }
}

/// Writes the URL as the body; URLs containing "broken" fail.
struct EchoFetch;

impl Fetch for EchoFetch {
    fn fetch_to(&self, job: &FetchJob, _progress: &dyn FetchProgress) -> Result<u64, DataError> {
        if job.url.contains("broken") {
            return Err(DataError::remote(&job.url, "HTTP 503"));
        }
        if let Some(parent) = job.dest.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let body = match &job.bearer_token {
            Some(token) => format!("{} bearer={token}", job.url),
            None => job.url.clone(),
        };
        fs::write(&job.dest, &body).unwrap();
        Ok(body.len() as u64)
    }
}

fn fetcher() -> Arc<ParallelFetcher> {
    Arc::new(ParallelFetcher::new(Arc::new(EchoFetch), 2))
}

// ── Plain HTTP ──

#[test]
fn http_single_url_is_recorded() {
    let h = Harness::new();
    let dispatch = h.dispatch().with_provider(Box::new(HttpProvider::new(fetcher())));
    let registry = Registry::builtin().unwrap();
    let descriptor = registry.get("test_http").unwrap();

    let record = h.run(&dispatch, descriptor, &AcquireOptions::default()).unwrap();
    let Locator::Url(url) = &descriptor.locator else {
        panic!("test_http should be a single url");
    };
    assert_eq!(&record.source_url, url);
    assert_eq!(record.extra["files"].as_array().unwrap().len(), 1);
    assert!(h.has_metadata("test_http"));
}

#[test]
fn http_partial_failure_leaves_no_metadata() {
    let h = Harness::new();
    let dispatch = h.dispatch().with_provider(Box::new(HttpProvider::new(fetcher())));
    let descriptor = DatasetDescriptor::new(
        "mixed",
        Locator::Urls(vec![
            "https://example.com/a.csv".into(),
            "https://example.com/broken.csv".into(),
            "https://example.com/c.csv".into(),
        ]),
    );

    let err = h
        .run(&dispatch, &descriptor, &AcquireOptions::default())
        .unwrap_err();
    assert!(matches!(err, DataError::RemoteFetch { .. }), "{err}");
    assert!(err.to_string().contains("1 of 3"));
    assert!(h.dest("mixed").join("a.csv").is_file());
    assert!(h.dest("mixed").join("c.csv").is_file());
    assert!(!h.has_metadata("mixed"));
}

// ── Kaggle ──

struct ZipKaggle {
    called: Arc<AtomicBool>,
}

impl KaggleApi for ZipKaggle {
    fn download(
        &self,
        target: &KaggleTarget,
        auth: &KaggleAuth,
        archive: &Path,
        _progress: &dyn FetchProgress,
    ) -> Result<(), DataError> {
        self.called.store(true, Ordering::SeqCst);
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.key, "k-123");
        assert!(matches!(target, KaggleTarget::Dataset { .. }));

        let mut zip = ::zip::ZipWriter::new(File::create(archive).unwrap());
        let options = ::zip::write::SimpleFileOptions::default();
        zip.start_file("train.csv", options).unwrap();
        zip.write_all(b"id,sales\n1,10\n").unwrap();
        zip.start_file("extra/stores.csv", options).unwrap();
        zip.write_all(b"store\nA\n").unwrap();
        zip.finish().unwrap();
        Ok(())
    }
}

fn kaggle_descriptor() -> DatasetDescriptor {
    DatasetDescriptor::new("shop", Locator::Kaggle("someone/shop-sales".into()))
}

#[test]
fn kaggle_archive_is_extracted() {
    let h = Harness::new();
    h.credentials.set_credential("kaggle", "username", "alice").unwrap();
    h.credentials.set_credential("kaggle", "key", "k-123").unwrap();
    let called = Arc::new(AtomicBool::new(false));
    let dispatch = h.dispatch().with_provider(Box::new(KaggleProvider::new(
        h.credentials.clone(),
        Box::new(ZipKaggle {
            called: called.clone(),
        }),
    )));

    let record = h
        .run(&dispatch, &kaggle_descriptor(), &AcquireOptions::default())
        .unwrap();
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(record.extra["kaggle_kind"], "dataset");
    assert!(h.dest("shop").join("train.csv").is_file());
    assert!(h.dest("shop").join("extra/stores.csv").is_file());
    assert!(!h.root.join("staging/shop").exists());
}

#[test]
fn kaggle_without_credentials_never_calls_api() {
    let h = Harness::new();
    let called = Arc::new(AtomicBool::new(false));
    let dispatch = h.dispatch().with_provider(Box::new(KaggleProvider::new(
        h.credentials.clone(),
        Box::new(ZipKaggle {
            called: called.clone(),
        }),
    )));

    let err = h
        .run(&dispatch, &kaggle_descriptor(), &AcquireOptions::default())
        .unwrap_err();
    match err {
        DataError::MissingCredentials { service, detail } => {
            assert_eq!(service, "kaggle");
            assert!(detail.contains("auth set kaggle"));
        }
        other => panic!("expected missing credentials, got {other}"),
    }
    assert!(!called.load(Ordering::SeqCst));
    assert!(!h.has_metadata("shop"));
}

// ── Hub ──

struct FakeHub;

impl HubApi for FakeHub {
    fn list_files(
        &self,
        _repo: &str,
        _revision: &str,
        _token: Option<&str>,
    ) -> Result<Vec<HubFile>, DataError> {
        Ok(["README.md", "data/train.parquet", "data/test.parquet", "data/raw.csv"]
            .iter()
            .map(|p| HubFile {
                path: p.to_string(),
                size: None,
            })
            .collect())
    }

    fn file_url(&self, repo: &str, revision: &str, path: &str) -> String {
        format!("https://hub.test/{repo}/resolve/{revision}/{path}")
    }

    fn repo_url(&self, repo: &str) -> String {
        format!("https://hub.test/datasets/{repo}")
    }
}

fn hub_descriptor() -> DatasetDescriptor {
    DatasetDescriptor::new("hubset", Locator::HubRepo("org/sales".into()))
}

#[test]
fn hub_include_and_exclude_patterns() {
    let h = Harness::new();
    h.credentials.set_credential("huggingface", "token", "hf-tok").unwrap();
    let dispatch = h.dispatch().with_provider(Box::new(HubProvider::new(
        h.credentials.clone(),
        Box::new(FakeHub),
        fetcher(),
    )));
    let options = AcquireOptions {
        include_patterns: vec!["data/*".into()],
        exclude_patterns: vec!["*test*".into()],
        revision: Some("v1".into()),
        ..AcquireOptions::default()
    };

    let record = h.run(&dispatch, &hub_descriptor(), &options).unwrap();
    let dest = h.dest("hubset");
    assert!(dest.join("data/train.parquet").is_file());
    assert!(dest.join("data/raw.csv").is_file());
    assert!(!dest.join("data/test.parquet").exists());
    assert!(!dest.join("README.md").exists());
    assert_eq!(record.extra["revision"], "v1");
    assert_eq!(record.source_url, "https://hub.test/datasets/org/sales");

    let body = fs::read_to_string(dest.join("data/raw.csv")).unwrap();
    assert!(body.contains("/resolve/v1/data/raw.csv"));
    assert!(body.ends_with("bearer=hf-tok"));
}

#[test]
fn hub_without_matches_is_not_found() {
    let h = Harness::new();
    let dispatch = h.dispatch().with_provider(Box::new(HubProvider::new(
        h.credentials.clone(),
        Box::new(FakeHub),
        fetcher(),
    )));
    let options = AcquireOptions {
        include_patterns: vec!["*.json".into()],
        ..AcquireOptions::default()
    };
    let err = h.run(&dispatch, &hub_descriptor(), &options).unwrap_err();
    assert!(matches!(err, DataError::NotFound(_)), "{err}");
}

// ── UCI / OpenML ──

struct FakeTabular;

impl TabularApi for FakeTabular {
    fn fetch(&self, dataset_id: u32) -> Result<TabularFetch, DataError> {
        let features = DataFrame::new(vec![
            Column::new("age".into(), vec![31i64, 45, 22]),
            Column::new("income".into(), vec![40.5f64, 80.0, 21.3]),
        ])
        .unwrap();
        let targets =
            DataFrame::new(vec![Column::new("approved".into(), vec!["yes", "no", "yes"])])
                .unwrap();
        Ok(TabularFetch {
            features,
            targets: Some(targets),
            source_url: format!("https://tabular.test/{dataset_id}"),
            extra: Default::default(),
        })
    }
}

#[test]
fn tabular_writes_features_and_targets() {
    let h = Harness::new();
    let dispatch = h
        .dispatch()
        .with_provider(Box::new(TabularProvider::uci(Box::new(FakeTabular))));
    let descriptor = DatasetDescriptor::new("credit", Locator::UciId(27));

    let record = h.run(&dispatch, &descriptor, &AcquireOptions::default()).unwrap();
    assert_eq!(record.extra["uci_id"], 27);
    assert_eq!(record.extra["rows"], 3);
    assert_eq!(record.source_url, "https://tabular.test/27");

    let features = fs::read_to_string(h.dest("credit").join("features.csv")).unwrap();
    assert!(features.starts_with("age,income"));
    let targets = fs::read_to_string(h.dest("credit").join("targets.csv")).unwrap();
    assert!(targets.starts_with("approved"));
}

// ── Pipeline ──

#[derive(Default)]
struct RecordingRunner {
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl PipelineRunner for RecordingRunner {
    fn run(&self, request: &PipelineRequest<'_>) -> Result<PipelineReport, DataError> {
        self.seen
            .lock()
            .unwrap()
            .push((request.base_url.to_string(), request.api_key.to_string()));
        fs::write(request.database, b"db").unwrap();
        Ok(PipelineReport {
            tables: request
                .resources
                .iter()
                .map(|r| LoadedTable {
                    name: r.clone(),
                    rows: 2,
                })
                .collect(),
        })
    }
}

fn pipeline_dispatch(h: &Harness, seen: Arc<Mutex<Vec<(String, String)>>>) -> ProviderDispatch {
    h.dispatch().with_provider(Box::new(PipelineProvider::new(
        h.credentials.clone(),
        Box::new(RecordingRunner { seen }),
    )))
}

#[test]
fn pipeline_uses_stored_key_and_base_url() {
    let h = Harness::new();
    h.credentials
        .set_credential("retail_express", "api_key", "secret-key")
        .unwrap();
    h.credentials
        .set_credential("retail_express", "base_url", "https://api.shop.test")
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatch = pipeline_dispatch(&h, seen.clone());
    let registry = Registry::builtin().unwrap();

    let record = h
        .run(
            &dispatch,
            registry.get("retail_express").unwrap(),
            &AcquireOptions::default(),
        )
        .unwrap();
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[("https://api.shop.test".to_string(), "secret-key".to_string())]
    );
    assert_eq!(record.extra["tables"]["orders"], 2);
    assert!(h.dest("retail_express").join("retail_express.duckdb").is_file());
}

#[test]
fn pipeline_options_override_store() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatch = pipeline_dispatch(&h, seen.clone());
    let registry = Registry::builtin().unwrap();
    let options = AcquireOptions {
        base_url: Some("https://override.test".into()),
        api_key: Some("cli-key".into()),
        ..AcquireOptions::default()
    };

    h.run(&dispatch, registry.get("retail_express").unwrap(), &options)
        .unwrap();
    assert_eq!(seen.lock().unwrap()[0].1, "cli-key");
}

#[test]
fn pipeline_missing_key_or_base_url() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let dispatch = pipeline_dispatch(&h, seen.clone());
    let registry = Registry::builtin().unwrap();
    let descriptor = registry.get("retail_express").unwrap();

    let err = h
        .run(&dispatch, descriptor, &AcquireOptions::default())
        .unwrap_err();
    assert!(matches!(err, DataError::MissingCredentials { .. }), "{err}");

    h.credentials
        .set_credential("retail_express", "api_key", "secret-key")
        .unwrap();
    let err = h
        .run(&dispatch, descriptor, &AcquireOptions::default())
        .unwrap_err();
    assert!(matches!(err, DataError::InvalidConfiguration(_)), "{err}");
    assert!(seen.lock().unwrap().is_empty());
}

// ── Dispatch ──

#[test]
fn unregistered_backend_is_unsupported() {
    let h = Harness::new();
    let err = h
        .run(&h.dispatch(), &kaggle_descriptor(), &AcquireOptions::default())
        .unwrap_err();
    assert!(matches!(err, DataError::UnsupportedProvider(_)));
}
