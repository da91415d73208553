//! In-process storage backend.
//!
//! Holds every object in a map. Used by tests and single-process demos where
//! the upload path and the workers share one address space.

use crate::keys::derived_key;
use crate::traits::{StorageAdapter, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use attache_core::models::DerivedKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_base_url("memory://attache")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            base_url: base_url.into(),
        }
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Store bytes under an explicit key, replacing any previous object.
    pub fn put(&self, key: impl Into<String>, data: Vec<u8>) -> StoredObject {
        let key = key.into();
        let url = self.generate_url(&key);
        self.objects.write().insert(key.clone(), data);
        StoredObject { locator: key, url }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).cloned()
    }

    /// Keys currently stored under `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn load_bytes(&self, locator: &str) -> StorageResult<Vec<u8>> {
        self.get(locator)
            .ok_or_else(|| StorageError::NotFound(locator.to_string()))
    }

    async fn save_derived(
        &self,
        data: Vec<u8>,
        suggested_name: &str,
        kind: DerivedKind,
    ) -> StorageResult<StoredObject> {
        let key = derived_key(kind, suggested_name);
        tracing::debug!(key = %key, size_bytes = data.len(), "Memory storage write");
        Ok(self.put(key, data))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_not_found() {
        let storage = MemoryStorage::new();
        storage.put("uploads/a.png", vec![9, 9]);

        assert_eq!(storage.load_bytes("uploads/a.png").await.unwrap(), vec![9, 9]);
        let err = storage.load_bytes("uploads/b.png").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_save_derived_is_listed_by_prefix() {
        let storage = MemoryStorage::with_base_url("https://cdn.example");
        let stored = storage
            .save_derived(vec![1], "model.glb", DerivedKind::Render)
            .await
            .unwrap();

        assert!(stored.url.starts_with("https://cdn.example/derived/render/"));
        assert_eq!(storage.keys_with_prefix("derived/render/"), vec![stored.locator]);
        assert_eq!(storage.len(), 1);
    }
}
