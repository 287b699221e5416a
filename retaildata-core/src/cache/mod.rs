//! On-disk layout, metadata records and checksum manifests.

pub mod layout;
pub mod manager;
pub mod metadata;

pub use layout::DataLayout;
pub use manager::{CacheManager, CachedDataset};
pub use metadata::{write_json_atomic, ChecksumManifest, DatasetMetadataRecord, VerifyReport};
