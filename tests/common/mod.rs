//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use capped_logger::config::{Environment, MapSource};
use capped_logger::store::{CappedBounds, LogStore, MemoryStore, StoreError};
use capped_logger::{Logger, LoggerOptions};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory store with switchable failures and an insert counter
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    unavailable: AtomicBool,
    failing_inserts: AtomicUsize,
    insert_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unavailable() -> Arc<Self> {
        let store = Self::default();
        store.unavailable.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    /// Make the next `n` inserts fail
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.inner.documents(collection).unwrap()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LogStore for FlakyStore {
    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        self.inner.list_collections().await
    }

    async fn create_capped(&self, name: &str, bounds: CappedBounds) -> Result<(), StoreError> {
        self.check_available()?;
        self.inner.create_capped(name, bounds).await
    }

    async fn insert(&self, collection: &str, document: &Value, acknowledged: bool) -> Result<(), StoreError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let failing = self.failing_inserts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_inserts.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }

        self.inner.insert(collection, document, acknowledged).await
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.inner.drop_collection(name).await
    }
}

pub const COLLECTION: &str = "test_log";

/// Options for the "test" environment with the given overrides
pub fn options(log_dir: &Path, overrides: Value) -> LoggerOptions {
    let mut section = json!({"safe_insert": true});
    if let (Some(base), Some(extra)) = (section.as_object_mut(), overrides.as_object()) {
        base.extend(extra.clone());
    }

    LoggerOptions::new(Environment::new("test"), log_path(log_dir))
        .with_source(MapSource::new("inline", json!({ "test": section })))
        .with_application_name("shop")
}

pub fn log_path(log_dir: &Path) -> PathBuf {
    log_dir.join("test.log")
}

pub async fn connected(log_dir: &Path, store: Arc<FlakyStore>, overrides: Value) -> Logger {
    Logger::connect_with_store(options(log_dir, overrides), store)
        .await
        .expect("logger should connect")
}

pub fn read_log(log_dir: &Path) -> String {
    std::fs::read_to_string(log_path(log_dir)).unwrap_or_default()
}
