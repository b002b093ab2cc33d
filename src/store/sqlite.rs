//! SQLite-backed capped store
//!
//! Layout:
//! - `capped_collections` catalog (created by migration) holds each
//!   collection's byte and document ceilings
//! - one `docs_<name>` table per collection holding JSON documents, with an
//!   AUTOINCREMENT id giving insertion order and an indexed `time` column
//!
//! Eviction runs in the same transaction as the insert, so a committed
//! collection never exceeds its bounds.

use super::{
    document_time, validate_collection_name, validate_document, CappedBounds, LogStore, StoreError,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

/// SQLite capped store handle
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database and run migrations
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteStore::new("sqlite:./log/production_log.db").await?;
    /// ```
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL");

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
                }
            }
        }

        // Every connection to `:memory:` is a separate database, pin a single one
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        tracing::debug!("Capped store migrations completed");
        Ok(())
    }

    fn table(name: &str) -> String {
        format!("\"docs_{}\"", name)
    }

    /// Bounds of an existing collection
    pub async fn bounds(&self, name: &str) -> Result<Option<CappedBounds>, StoreError> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT size_bytes, max_documents FROM capped_collections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(size, max)| CappedBounds {
            size_bytes: size as u64,
            max_documents: max as u64,
        }))
    }

    /// All documents of a collection, oldest first
    pub async fn documents(&self, name: &str) -> Result<Vec<Value>, StoreError> {
        validate_collection_name(name)?;
        if self.bounds(name).await?.is_none() {
            return Err(StoreError::NoSuchCollection(name.to_string()));
        }

        let rows = sqlx::query(&format!(
            "SELECT document FROM {} ORDER BY id ASC",
            Self::table(name)
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body: String = row.get("document");
                serde_json::from_str(&body).map_err(StoreError::from)
            })
            .collect()
    }

    /// Number of documents in a collection
    pub async fn count(&self, name: &str) -> Result<u64, StoreError> {
        validate_collection_name(name)?;
        if self.bounds(name).await?.is_none() {
            return Err(StoreError::NoSuchCollection(name.to_string()));
        }

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", Self::table(name)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Insert and evict in one transaction
    async fn write_document(&self, collection: &str, document: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(document)?;
        let size = body.len() as i64;
        let table = Self::table(collection);

        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT size_bytes, max_documents FROM capped_collections WHERE name = ?",
        )
        .bind(collection)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((size_cap, max_documents)) = row else {
            return Err(StoreError::NoSuchCollection(collection.to_string()));
        };

        if size > size_cap {
            return Err(StoreError::InvalidDocument(format!(
                "document of {} bytes exceeds collection size {}",
                size, size_cap
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO {} (time, size, document) VALUES (?, ?, ?)",
            table
        ))
        .bind(document_time(document))
        .bind(size)
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        let mut evicted = 0;

        if max_documents > 0 {
            let result = sqlx::query(&format!(
                "DELETE FROM {t} WHERE id IN (SELECT id FROM {t} ORDER BY id DESC LIMIT -1 OFFSET ?)",
                t = table
            ))
            .bind(max_documents)
            .execute(&mut *tx)
            .await?;
            evicted += result.rows_affected();
        }

        let result = sqlx::query(&format!(
            "DELETE FROM {t} WHERE id <= (
                 SELECT id FROM (
                     SELECT id, SUM(size) OVER (ORDER BY id DESC) AS running FROM {t}
                 ) WHERE running > ? ORDER BY id DESC LIMIT 1
             )",
            t = table
        ))
        .bind(size_cap)
        .execute(&mut *tx)
        .await?;
        evicted += result.rows_affected();

        tx.commit().await?;

        if evicted > 0 {
            tracing::trace!(collection = %collection, evicted = evicted, "Evicted oldest documents");
        }

        Ok(())
    }

    /// Get the underlying connection pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM capped_collections ORDER BY name ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn create_capped(&self, name: &str, bounds: CappedBounds) -> Result<(), StoreError> {
        validate_collection_name(name)?;
        let (size_bytes, max_documents) = bounds.to_i64()?;
        let table = Self::table(name);

        let mut tx = self.pool.begin().await?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT name FROM capped_collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_some() {
            return Err(StoreError::CollectionExists(name.to_string()));
        }

        sqlx::query(
            "INSERT INTO capped_collections (name, size_bytes, max_documents, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(size_bytes)
        .bind(max_documents)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 time TEXT,
                 size INTEGER NOT NULL,
                 document TEXT NOT NULL
             )",
            table
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"idx_docs_{}_time\" ON {} (time)",
            name, table
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn insert(&self, collection: &str, document: &Value, acknowledged: bool) -> Result<(), StoreError> {
        validate_collection_name(collection)?;
        validate_document(document)?;

        match self.write_document(collection, document).await {
            Ok(()) => Ok(()),
            Err(e) if acknowledged => Err(e),
            Err(e) => {
                tracing::warn!(
                    collection = %collection,
                    error = %e,
                    "Unacknowledged insert failed"
                );
                Ok(())
            }
        }
    }

    async fn drop_collection(&self, name: &str) -> Result<(), StoreError> {
        validate_collection_name(name)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", Self::table(name)))
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM capped_collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
