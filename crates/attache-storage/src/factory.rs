#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-memory")]
use crate::MemoryStorage;
use crate::{StorageAdapter, StorageBackend, StorageResult, StoredObject};
use attache_core::Config;
use std::sync::Arc;

/// Backend chosen by configuration.
///
/// Keeps the concrete type so the upload side can place originals;
/// [`StorageAdapter`] has no write-by-key operation.
#[derive(Clone)]
pub enum ConfiguredStorage {
    #[cfg(feature = "storage-local")]
    Local(LocalStorage),
    #[cfg(feature = "storage-memory")]
    Memory(MemoryStorage),
}

impl ConfiguredStorage {
    /// Worker-facing view of the same backend.
    pub fn adapter(&self) -> Arc<dyn StorageAdapter> {
        match self {
            #[cfg(feature = "storage-local")]
            ConfiguredStorage::Local(storage) => Arc::new(storage.clone()),
            #[cfg(feature = "storage-memory")]
            ConfiguredStorage::Memory(storage) => Arc::new(storage.clone()),
        }
    }

    /// Place an original upload under `key`.
    pub async fn put(&self, key: &str, data: Vec<u8>) -> StorageResult<StoredObject> {
        match self {
            #[cfg(feature = "storage-local")]
            ConfiguredStorage::Local(storage) => storage.put(key, &data).await,
            #[cfg(feature = "storage-memory")]
            ConfiguredStorage::Memory(storage) => Ok(storage.put(key, data)),
        }
    }

    pub fn backend_type(&self) -> StorageBackend {
        match self {
            #[cfg(feature = "storage-local")]
            ConfiguredStorage::Local(_) => StorageBackend::Local,
            #[cfg(feature = "storage-memory")]
            ConfiguredStorage::Memory(_) => StorageBackend::Memory,
        }
    }
}

/// Open the storage backend named by configuration
pub async fn open_storage(config: &Config) -> StorageResult<ConfiguredStorage> {
    match config.storage_backend {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage = LocalStorage::new(
                config.local_storage_path.clone(),
                config.local_storage_base_url.clone(),
            )
            .await?;
            Ok(ConfiguredStorage::Local(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(crate::StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-memory")]
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; derived assets are lost on exit");
            Ok(ConfiguredStorage::Memory(MemoryStorage::with_base_url(
                config.local_storage_base_url.clone(),
            )))
        }

        #[cfg(not(feature = "storage-memory"))]
        StorageBackend::Memory => Err(crate::StorageError::ConfigError(
            "Memory storage backend not available (storage-memory feature not enabled)".to_string(),
        )),
    }
}

/// Create a storage backend based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn StorageAdapter>> {
    Ok(open_storage(config).await?.adapter())
}

#[cfg(all(test, feature = "storage-local", feature = "storage-memory"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            local_storage_path: dir.path().join("files"),
            ..Config::default()
        };
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);
        assert!(dir.path().join("files").is_dir());

        let config = Config {
            storage_backend: StorageBackend::Memory,
            ..Config::default()
        };
        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Memory);
    }

    #[tokio::test]
    async fn staged_upload_is_visible_to_adapter() {
        let config = Config {
            storage_backend: StorageBackend::Memory,
            ..Config::default()
        };
        let storage = open_storage(&config).await.unwrap();
        storage
            .put("uploads/room/a.stl", b"solid a".to_vec())
            .await
            .unwrap();
        let bytes = storage.adapter().load_bytes("uploads/room/a.stl").await.unwrap();
        assert_eq!(bytes, b"solid a");
    }
}
