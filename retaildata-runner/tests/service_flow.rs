//! `RetailData` driven with an in-process backend: download, cache reuse,
//! prepare, load, temporal split, verify, delete.

use chrono::NaiveDate;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use retaildata_core::config::Settings;
use retaildata_core::credentials::{CredentialManager, EncryptedFileStore, KdfParams};
use retaildata_core::providers::{
    AcquireContext, AcquireOptions, Acquisition, DatasetProvider, ProviderDispatch,
};
use retaildata_core::registry::{DatasetDescriptor, Locator, ProviderKind, Registry};
use retaildata_core::DataError;
use retaildata_runner::{DownloadOptions, LoadOptions, PrepareOptions, RetailData};

const SALES: &str = "date,store,units\n\
2015-01-05,1,10\n\
2015-03-10,2,12\n\
2015-06-30,1,7\n\
2015-07-01,2,9\n\
2015-08-15,1,11\n";

/// Writes a sales and a stores table; counts calls.
struct ShopBackend {
    calls: Arc<AtomicUsize>,
}

impl DatasetProvider for ShopBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    fn acquire(
        &self,
        _descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(ctx.destination.join("transactions.csv"), SALES).unwrap();
        fs::write(ctx.destination.join("stores.csv"), "store,city\n1,Leeds\n2,York\n").unwrap();
        Ok(Acquisition::new("https://shop.test/export").with_extra("files", 2))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    calls: Arc<AtomicUsize>,
    app: RetailData,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::rooted_at(dir.path());

    let mut registry = Registry::new();
    registry
        .register(
            DatasetDescriptor::new("shop", Locator::Url("https://shop.test/export".into()))
                .with_tags(["retail", "test"])
                .with_mapping("sales", "transactions")
                .with_mapping("stores", "stores"),
        )
        .unwrap();

    let store = EncryptedFileStore::open(
        settings.credential_file.clone(),
        "pw",
        KdfParams::new(1024, 1, 1),
    )
    .unwrap();
    let credentials = Arc::new(CredentialManager::with_store(Arc::new(store)));

    let calls = Arc::new(AtomicUsize::new(0));
    let dispatch = ProviderDispatch::empty(settings.cache_dir.join("staging"))
        .with_provider(Box::new(ShopBackend {
            calls: calls.clone(),
        }));

    let app = RetailData::from_parts(settings, Arc::new(registry), credentials, dispatch);
    Fixture {
        _dir: dir,
        calls,
        app,
    }
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[test]
fn unknown_dataset_is_reported() {
    let f = fixture();
    assert!(matches!(
        f.app.download("nope", &DownloadOptions::default()),
        Err(DataError::DatasetNotFound { .. })
    ));
}

#[test]
fn second_download_uses_cache_unless_forced() {
    let f = fixture();
    let first = f.app.download("shop", &DownloadOptions::default()).unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.metadata.source_url, "https://shop.test/export");

    let second = f.app.download("shop", &DownloadOptions::default()).unwrap();
    assert!(second.from_cache);
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);

    let forced = DownloadOptions {
        acquire: AcquireOptions {
            force: true,
            ..AcquireOptions::default()
        },
        ..DownloadOptions::default()
    };
    assert!(!f.app.download("shop", &forced).unwrap().from_cache);

    let uncached = DownloadOptions {
        use_cache: Some(false),
        ..DownloadOptions::default()
    };
    f.app.download("shop", &uncached).unwrap();
    assert_eq!(f.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn download_with_prepare_then_load() {
    let f = fixture();
    let outcome = f
        .app
        .download(
            "shop",
            &DownloadOptions {
                prepare: Some(PrepareOptions::default()),
                ..DownloadOptions::default()
            },
        )
        .unwrap();
    assert!(outcome.prepared.unwrap().succeeded());

    let raw = f.app.load("shop", &LoadOptions::default()).unwrap();
    let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["stores", "transactions"]);
    assert_eq!(raw["transactions"].height(), 5);

    let std = f.app.load("shop", &LoadOptions { standardized: true }).unwrap();
    let keys: Vec<&str> = std.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["sales", "stores"]);

    let lazy = f.app.load_lazy("shop", &LoadOptions { standardized: true }).unwrap();
    let sales = lazy["sales"].clone().collect().unwrap();
    assert_eq!(sales.height(), 5);
}

#[test]
fn standardized_load_keeps_split_suffixes() {
    let f = fixture();
    f.app.download("shop", &DownloadOptions::default()).unwrap();
    f.app
        .prepare(
            "shop",
            &PrepareOptions {
                split_fraction: Some(0.6),
                seed: Some(1),
                ..PrepareOptions::default()
            },
        )
        .unwrap();

    let std = f.app.load("shop", &LoadOptions { standardized: true }).unwrap();
    let keys: Vec<&str> = std.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["sales_test", "sales_train", "stores_test", "stores_train"]);
    assert_eq!(std["sales_train"].height(), 3);
    assert_eq!(std["sales_test"].height(), 2);
}

#[test]
fn temporal_split_defaults_to_sales_table() {
    let f = fixture();
    f.app
        .download(
            "shop",
            &DownloadOptions {
                prepare: Some(PrepareOptions::default()),
                ..DownloadOptions::default()
            },
        )
        .unwrap();

    let split = f
        .app
        .split_temporal("shop", "date", day("2015-07-01"), None)
        .unwrap();
    assert_eq!(split.train.height(), 3);
    assert_eq!(split.test.height(), 2);

    let missing = f
        .app
        .split_temporal("shop", "date", day("2015-07-01"), Some("returns"));
    assert!(matches!(missing, Err(DataError::NotFound(_))));
}

#[test]
fn load_before_prepare_is_not_found() {
    let f = fixture();
    f.app.download("shop", &DownloadOptions::default()).unwrap();
    assert!(matches!(
        f.app.load("shop", &LoadOptions::default()),
        Err(DataError::NotFound(_))
    ));
}

#[test]
fn verify_list_and_delete() {
    let f = fixture();
    f.app.download("shop", &DownloadOptions::default()).unwrap();

    assert!(f.app.verify("shop").unwrap().is_clean());
    let listed = f.app.list_downloaded().unwrap();
    assert!(listed.contains_key("shop"));

    let raw = f.app.layout().raw_dir("shop");
    fs::write(raw.join("stray.csv"), "x\n1\n").unwrap();
    assert_eq!(f.app.verify("shop").unwrap().unexpected, vec!["stray.csv"]);

    assert!(f.app.delete("shop").unwrap());
    assert!(!f.app.delete("shop").unwrap());
    assert!(f.app.list_downloaded().unwrap().is_empty());
}

#[test]
fn forced_download_drops_stale_raw_files() {
    let f = fixture();
    f.app.download("shop", &DownloadOptions::default()).unwrap();
    let raw = f.app.layout().raw_dir("shop");
    fs::write(raw.join("stale.csv"), "x\n1\n").unwrap();

    let forced = DownloadOptions {
        acquire: AcquireOptions {
            force: true,
            ..AcquireOptions::default()
        },
        ..DownloadOptions::default()
    };
    f.app.download("shop", &forced).unwrap();
    assert!(!raw.join("stale.csv").exists());
    assert!(f.app.verify("shop").unwrap().is_clean());
}

#[test]
fn forced_download_drops_stale_prepared_tables() {
    let f = fixture();
    let with_prepare = DownloadOptions {
        prepare: Some(PrepareOptions::default()),
        ..DownloadOptions::default()
    };
    f.app.download("shop", &with_prepare).unwrap();
    assert!(f.app.load("shop", &LoadOptions::default()).is_ok());

    let forced = DownloadOptions {
        acquire: AcquireOptions {
            force: true,
            ..AcquireOptions::default()
        },
        ..DownloadOptions::default()
    };
    f.app.download("shop", &forced).unwrap();
    assert!(!f.app.layout().prepared_dir("shop").exists());
    assert!(matches!(
        f.app.load("shop", &LoadOptions::default()),
        Err(DataError::NotFound(_))
    ));

    let mut forced_with_prepare = with_prepare.clone();
    forced_with_prepare.acquire.force = true;
    f.app.download("shop", &forced_with_prepare).unwrap();
    assert_eq!(f.app.load("shop", &LoadOptions::default()).unwrap().len(), 2);
}

#[test]
fn purge_keeps_data_root() {
    let f = fixture();
    f.app.download("shop", &DownloadOptions::default()).unwrap();
    f.app.purge_all().unwrap();
    assert!(!f.app.cache().is_downloaded("shop"));
    assert!(f.app.settings().data_dir.is_dir());
}
