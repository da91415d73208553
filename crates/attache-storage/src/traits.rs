//! Storage abstraction trait
//!
//! This module defines the StorageAdapter trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use attache_core::models::DerivedKind;
use attache_core::ProcessingError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// A missing or unaddressable object will not appear on retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::InvalidKey(_))
    }
}

impl From<StorageError> for ProcessingError {
    /// Anything but a permanent storage error is treated as the medium being
    /// temporarily unavailable.
    fn from(err: StorageError) -> Self {
        if err.is_permanent() {
            ProcessingError::permanent(err)
        } else {
            ProcessingError::transient(err)
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Where a derived asset ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Opaque reference accepted by `load_bytes`.
    pub locator: String,
    /// Address clients use to fetch the asset.
    pub url: String,
}

/// Storage abstraction trait
///
/// Workers never touch a storage medium directly: originals are read with
/// `load_bytes` and derived assets written with `save_derived`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Load the bytes behind a locator.
    ///
    /// Returns `StorageError::NotFound` when nothing is stored there.
    async fn load_bytes(&self, locator: &str) -> StorageResult<Vec<u8>>;

    /// Persist a derived asset under a new locator.
    ///
    /// `suggested_name` is a hint; backends sanitize it and add a unique prefix.
    async fn save_derived(
        &self,
        data: Vec<u8>,
        suggested_name: &str,
        kind: DerivedKind,
    ) -> StorageResult<StoredObject>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
