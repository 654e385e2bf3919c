//! SQLite-backed key/value repository

use super::migrations::INIT_SCHEMA;
use super::KeyValueStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Database connection and operations
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection that never expires: the data lives in it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::query(INIT_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        Ok(())
    }

    /// Keys currently stored in a namespace
    pub async fn keys(&self, namespace: &str) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM kv_store WHERE namespace = ? ORDER BY key ASC")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_store WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, namespace: &str, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (namespace, key, value, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(namespace, key) DO UPDATE
            SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let db = Database::in_memory().await.unwrap();

        assert_eq!(db.get("ns", "k").await.unwrap(), None);
        db.set("ns", "k", "v1").await.unwrap();
        db.set("ns", "k", "v2").await.unwrap();
        assert_eq!(db.get("ns", "k").await.unwrap().as_deref(), Some("v2"));

        db.delete("ns", "k").await.unwrap();
        db.delete("ns", "k").await.unwrap();
        assert_eq!(db.get("ns", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_is_scoped_to_namespace() {
        let db = Database::in_memory().await.unwrap();

        db.set("a", "one", "1").await.unwrap();
        db.set("a", "two", "2").await.unwrap();
        db.set("b", "one", "x").await.unwrap();

        assert_eq!(db.keys("a").await.unwrap(), vec!["one", "two"]);
        db.clear("a").await.unwrap();

        assert!(db.keys("a").await.unwrap().is_empty());
        assert_eq!(db.get("b", "one").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prism.db");

        {
            let db = Database::new(&path).await.unwrap();
            db.set("ns", "k", "persisted").await.unwrap();
            db.close().await;
        }

        let db = Database::new(&path).await.unwrap();
        assert_eq!(db.get("ns", "k").await.unwrap().as_deref(), Some("persisted"));
    }
}
