//! In-process capped store

use super::{validate_collection_name, validate_document, CappedBounds, LogStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Collection {
    bounds: CappedBounds,
    documents: VecDeque<(u64, Value)>,
    total_bytes: u64,
}

impl Collection {
    fn push(&mut self, size: u64, document: Value) {
        self.documents.push_back((size, document));
        self.total_bytes += size;

        while self.bounds.max_documents > 0 && self.documents.len() as u64 > self.bounds.max_documents {
            self.evict_oldest();
        }
        while self.total_bytes > self.bounds.size_bytes {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some((size, _)) = self.documents.pop_front() {
            self.total_bytes -= size;
        }
    }
}

/// Capped store held in memory, dropped with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Collection>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn bounds(&self, name: &str) -> Result<Option<CappedBounds>, StoreError> {
        Ok(self.lock()?.get(name).map(|c| c.bounds))
    }

    /// All documents of a collection, oldest first
    pub fn documents(&self, name: &str) -> Result<Vec<Value>, StoreError> {
        let collections = self.lock()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))?;
        Ok(collection.documents.iter().map(|(_, doc)| doc.clone()).collect())
    }

    pub fn count(&self, name: &str) -> Result<u64, StoreError> {
        let collections = self.lock()?;
        collections
            .get(name)
            .map(|c| c.documents.len() as u64)
            .ok_or_else(|| StoreError::NoSuchCollection(name.to_string()))
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_capped(&self, name: &str, bounds: CappedBounds) -> Result<(), StoreError> {
        validate_collection_name(name)?;
        bounds.to_i64()?;

        let mut collections = self.lock()?;
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        collections.insert(
            name.to_string(),
            Collection {
                bounds,
                documents: VecDeque::new(),
                total_bytes: 0,
            },
        );
        Ok(())
    }

    async fn insert(&self, collection: &str, document: &Value, acknowledged: bool) -> Result<(), StoreError> {
        validate_document(document)?;
        let size = serde_json::to_string(document)?.len() as u64;

        let mut collections = self.lock()?;
        let outcome = match collections.get_mut(collection) {
            None => Err(StoreError::NoSuchCollection(collection.to_string())),
            Some(c) if size > c.bounds.size_bytes => Err(StoreError::InvalidDocument(format!(
                "document of {} bytes exceeds collection size {}",
                size, c.bounds.size_bytes
            ))),
            Some(c) => {
                c.push(size, document.clone());
                Ok(())
            }
        };

        match outcome {
            Err(e) if !acknowledged => {
                tracing::warn!(collection = %collection, error = %e, "Unacknowledged insert failed");
                Ok(())
            }
            other => other,
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.lock()?.remove(name);
        Ok(())
    }
}
