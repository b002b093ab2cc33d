//! Capped collection lifecycle

use crate::config::LoggerConfig;
use crate::store::{CappedBounds, LogStore, StoreError};
use std::sync::Arc;

/// Owns the existence of one capped collection in a store
#[derive(Clone)]
pub struct CappedCollection {
    store: Arc<dyn LogStore>,
    name: String,
    bounds: CappedBounds,
}

impl CappedCollection {
    pub fn new(store: Arc<dyn LogStore>, name: impl Into<String>, bounds: CappedBounds) -> Self {
        Self {
            store,
            name: name.into(),
            bounds,
        }
    }

    pub fn from_config(store: Arc<dyn LogStore>, config: &LoggerConfig) -> Self {
        Self::new(
            store,
            config.collection.clone(),
            CappedBounds {
                size_bytes: config.cap_data_size,
                max_documents: config.cap_object_num,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> CappedBounds {
        self.bounds
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Create the collection unless the store already lists it
    ///
    /// Returns `true` when the collection was created by this call.
    pub async fn ensure_exists(&self) -> Result<bool, StoreError> {
        let existing = self.store.list_collections().await?;
        if existing.iter().any(|name| name == &self.name) {
            return Ok(false);
        }

        self.store.create_capped(&self.name, self.bounds).await?;

        tracing::info!(
            collection = %self.name,
            size_bytes = self.bounds.size_bytes,
            max_documents = self.bounds.max_documents,
            "Created capped collection"
        );
        Ok(true)
    }

    /// Drop the collection and create it again, empty
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.drop_collection(&self.name).await?;
        tracing::warn!(collection = %self.name, "Dropped capped collection");
        self.ensure_exists().await?;
        Ok(())
    }
}
