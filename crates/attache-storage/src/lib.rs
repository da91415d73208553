//! Attache Storage Library
//!
//! The [`StorageAdapter`] trait is the pipeline's only view of file bytes:
//! workers load originals by locator and persist derived assets through it.
//!
//! # Key format
//!
//! Originals live wherever the upload path put them; the pipeline treats their
//! locators as opaque. Derived assets are written under
//! `derived/{kind}/{uuid}-{sanitized_name}`, generated in the `keys` module so
//! every backend lays them out the same way.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-memory")]
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use attache_core::StorageBackend;
pub use factory::{create_storage, open_storage, ConfiguredStorage};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-memory")]
pub use memory::MemoryStorage;
pub use traits::{StorageAdapter, StorageError, StorageResult, StoredObject};
