//! Dataset registry: descriptors and the catalog that indexes them.

pub mod catalog;
pub mod descriptor;

pub use catalog::{Registry, RegistryError};
pub use descriptor::{
    validate_dataset_id, CredentialUse, DatasetDescriptor, HierarchyLevel, Locator, ProviderKind,
    TimeWindow,
};
