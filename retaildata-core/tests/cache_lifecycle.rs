//! Acquire → inspect → verify → delete, through the real dispatcher and
//! cache manager with an in-process backend.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use retaildata_core::cache::{CacheManager, DataLayout};
use retaildata_core::fetch::NoProgress;
use retaildata_core::providers::{
    AcquireContext, AcquireOptions, Acquisition, DatasetProvider, ProviderDispatch,
};
use retaildata_core::registry::{DatasetDescriptor, ProviderKind, Registry};
use retaildata_core::DataError;

/// Writes two small files, one in a subdirectory.
struct FixtureBackend;

impl DatasetProvider for FixtureBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Http
    }

    fn acquire(
        &self,
        descriptor: &DatasetDescriptor,
        ctx: &AcquireContext<'_>,
    ) -> Result<Acquisition, DataError> {
        fs::create_dir_all(ctx.destination.join("extra")).unwrap();
        fs::write(ctx.destination.join("iris.csv"), "sepal,species\n5.1,setosa\n").unwrap();
        fs::write(ctx.destination.join("extra/notes.txt"), "fixture").unwrap();
        Ok(Acquisition::new(format!("fixture://{}", descriptor.id)))
    }
}

fn setup(root: &Path) -> (Arc<Registry>, CacheManager, ProviderDispatch) {
    let registry = Arc::new(Registry::builtin().unwrap());
    let cache = CacheManager::new(DataLayout::new(root), registry.clone());
    let dispatch =
        ProviderDispatch::empty(root.join("staging")).with_provider(Box::new(FixtureBackend));
    (registry, cache, dispatch)
}

fn acquire(registry: &Registry, cache: &CacheManager, dispatch: &ProviderDispatch, id: &str) {
    let descriptor = registry.get(id).unwrap();
    let layout = cache.layout();
    dispatch
        .acquire(
            descriptor,
            &layout.raw_dir(id),
            &layout.meta_root(),
            &AcquireOptions::default(),
            &NoProgress,
        )
        .unwrap();
}

#[test]
fn full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, cache, dispatch) = setup(dir.path());

    assert!(!cache.is_downloaded("test_http"));
    acquire(&registry, &cache, &dispatch, "test_http");
    assert!(cache.is_downloaded("test_http"));

    let record = cache.metadata("test_http").unwrap().unwrap();
    assert_eq!(record.id, "test_http");
    assert_eq!(record.provider, ProviderKind::Http);
    assert_eq!(record.source_url, "fixture://test_http");

    let listed = cache.list_downloaded().unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed["test_http"].size > 0);
    assert_eq!(listed["test_http"].path, cache.layout().raw_dir("test_http"));

    let report = cache.verify("test_http").unwrap();
    assert!(report.is_clean());
    assert_eq!(report.checked, 2);

    assert!(cache.delete("test_http").unwrap());
    assert!(!cache.is_downloaded("test_http"));
    assert!(!cache.delete("test_http").unwrap());
    assert_eq!(cache.size("test_http"), 0);
}

#[test]
fn verify_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, cache, dispatch) = setup(dir.path());
    acquire(&registry, &cache, &dispatch, "test_multi");

    let raw = cache.layout().raw_dir("test_multi");
    fs::write(raw.join("iris.csv"), "tampered").unwrap();
    fs::remove_file(raw.join("extra/notes.txt")).unwrap();

    let report = cache.verify("test_multi").unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.mismatched, vec!["iris.csv"]);
    assert_eq!(report.missing, vec!["extra/notes.txt"]);
}

#[test]
fn reacquire_replaces_record() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, cache, dispatch) = setup(dir.path());
    acquire(&registry, &cache, &dispatch, "test_http");
    let first = cache.metadata("test_http").unwrap().unwrap();

    acquire(&registry, &cache, &dispatch, "test_http");
    let second = cache.metadata("test_http").unwrap().unwrap();
    assert!(second.downloaded_at >= first.downloaded_at);
    assert!(cache.verify("test_http").unwrap().is_clean());
}

#[test]
fn purge_then_list_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, cache, dispatch) = setup(dir.path());
    acquire(&registry, &cache, &dispatch, "test_http");
    acquire(&registry, &cache, &dispatch, "test_multi");
    assert_eq!(cache.list_downloaded().unwrap().len(), 2);

    cache.purge_all().unwrap();
    assert!(cache.list_downloaded().unwrap().is_empty());
    assert!(dir.path().exists());
}
