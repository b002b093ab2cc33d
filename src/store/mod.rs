//! Capped document stores
//!
//! The writer only needs four operations from a backend: list collections,
//! create a capped collection, insert a document and drop a collection.
//! Two implementations are provided:
//! - **`SqliteStore`**: persistent, one table per collection plus a catalog
//! - **`MemoryStore`**: in-process, for embedding and tests
//!
//! Both evict the oldest documents once either ceiling is exceeded and both
//! reject documents a document database would refuse (see `validate_document`).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Maximum nesting depth accepted in a document
pub const MAX_DOCUMENT_DEPTH: usize = 32;

/// Store-level errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    NoSuchCollection(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("invalid collection name: {0}")]
    InvalidName(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid collection bounds: {0}")]
    InvalidBounds(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bounds of a capped collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CappedBounds {
    pub size_bytes: u64,
    /// `0` leaves only the byte ceiling; configuration rejects it
    pub max_documents: u64,
}

impl CappedBounds {
    /// Both ceilings as signed integers, the range stores can persist
    pub fn to_i64(self) -> Result<(i64, i64), StoreError> {
        let size = i64::try_from(self.size_bytes)
            .map_err(|_| StoreError::InvalidBounds(format!("size {} exceeds {}", self.size_bytes, i64::MAX)))?;
        let max = i64::try_from(self.max_documents).map_err(|_| {
            StoreError::InvalidBounds(format!("max documents {} exceeds {}", self.max_documents, i64::MAX))
        })?;
        Ok((size, max))
    }
}

/// Backend collaborator used by the writer
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Names of all existing collections
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    /// Create a capped collection; fails if it already exists
    async fn create_capped(&self, name: &str, bounds: CappedBounds) -> Result<(), StoreError>;

    /// Insert one document
    ///
    /// With `acknowledged == false` only client-side validation errors are
    /// returned; write errors are logged and dropped.
    async fn insert(&self, collection: &str, document: &Value, acknowledged: bool) -> Result<(), StoreError>;

    /// Drop a collection; dropping a missing collection succeeds
    async fn drop_collection(&self, name: &str) -> Result<(), StoreError>;
}

/// Collection names are used as SQL identifiers, keep them simple
pub fn validate_collection_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 120
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("sqlite_");

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Reject field names and shapes a document database refuses
///
/// Field names must be non-empty, must not start with `$` and must not
/// contain `.`; nesting is limited to `MAX_DOCUMENT_DEPTH`.
pub fn validate_document(document: &Value) -> Result<(), StoreError> {
    if !document.is_object() {
        return Err(StoreError::InvalidDocument("top level must be an object".to_string()));
    }
    validate_value(document, 0, "")
}

fn validate_value(value: &Value, depth: usize, path: &str) -> Result<(), StoreError> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(StoreError::InvalidDocument(format!(
            "nesting deeper than {} at '{}'",
            MAX_DOCUMENT_DEPTH, path
        )));
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.is_empty() || key.starts_with('$') || key.contains('.') {
                    return Err(StoreError::InvalidDocument(format!(
                        "illegal field name '{}' at '{}'",
                        key, path
                    )));
                }
                validate_value(child, depth + 1, &format!("{}/{}", path, key))?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                validate_value(child, depth + 1, &format!("{}/{}", path, i))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Extract the `time` field of a document, if it is a string
pub(crate) fn document_time(document: &Value) -> Option<&str> {
    document.get("time").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("production_log").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("logs; DROP TABLE x").is_err());
        assert!(validate_collection_name("sqlite_master").is_err());
    }

    #[test]
    fn test_validate_document_accepts_plain_records() {
        let doc = json!({
            "time": "2024-01-01T00:00:00Z",
            "messages": {"INFO": ["a", "b"]},
            "params": {"id": 1, "tags": ["x"]}
        });
        assert!(validate_document(&doc).is_ok());
    }

    #[test]
    fn test_validate_document_rejects_illegal_keys() {
        let dotted = json!({"params": {"user.name": "bob"}});
        assert!(matches!(validate_document(&dotted), Err(StoreError::InvalidDocument(_))));

        let operator = json!({"params": {"filter": {"$gt": 3}}});
        assert!(validate_document(&operator).is_err());

        assert!(validate_document(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_validate_document_rejects_deep_nesting() {
        let mut doc = json!("leaf");
        for _ in 0..=MAX_DOCUMENT_DEPTH {
            doc = json!({ "n": doc });
        }
        assert!(validate_document(&doc).is_err());
    }
}
