//! SQLite persistence for storage-category preferences.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cachescope_core::{EnabledCategories, StorageCategory};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::PreferenceStore;

/// SQLite-backed [`PreferenceStore`].
///
/// Rows with an unknown category name or a non-boolean `enabled` value are
/// logged and ignored, so a damaged table degrades to "enabled" rather than
/// failing the load.
#[derive(Clone)]
pub struct SqlitePreferences {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePreferences {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn read_categories(conn: &Connection) -> Result<EnabledCategories> {
    let mut enabled = EnabledCategories::all();
    let mut stmt = conn.prepare("SELECT category, enabled FROM storage_preferences")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, SqlValue>(0)?, row.get::<_, SqlValue>(1)?))
    })?;

    for row in rows {
        let (name, flag) = row?;
        let parsed = match &name {
            SqlValue::Text(name) => StorageCategory::parse(name),
            _ => None,
        };
        let Some(category) = parsed else {
            tracing::warn!(category = ?name, "ignoring unknown storage category preference");
            continue;
        };
        match flag {
            SqlValue::Integer(0) => {
                enabled.disable(category);
            }
            SqlValue::Integer(1) => {
                enabled.enable(category);
            }
            other => {
                tracing::warn!(%category, value = ?other, "corrupt storage preference, treating as enabled");
            }
        }
    }

    Ok(enabled)
}

#[async_trait]
impl PreferenceStore for SqlitePreferences {
    async fn load_categories(&self) -> Result<EnabledCategories> {
        self.with_conn(read_categories).await
    }

    async fn save_category(&self, category: StorageCategory, enabled: bool) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO storage_preferences (category, enabled, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(category) DO UPDATE SET
                    enabled = excluded.enabled,
                    updated_at = excluded.updated_at",
                params![
                    category.as_str(),
                    enabled as i64,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(%category, enabled, "saved storage preference");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_all_enabled() {
        let prefs = SqlitePreferences::open_memory().unwrap();
        let loaded = prefs.load_categories().await.unwrap();
        assert_eq!(loaded, EnabledCategories::all());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let prefs = SqlitePreferences::open_memory().unwrap();
        prefs
            .save_category(StorageCategory::Mmkv, false)
            .await
            .unwrap();
        prefs
            .save_category(StorageCategory::Secure, false)
            .await
            .unwrap();
        prefs
            .save_category(StorageCategory::Secure, true)
            .await
            .unwrap();

        let loaded = prefs.load_categories().await.unwrap();
        assert!(!loaded.is_enabled(StorageCategory::Mmkv));
        assert!(loaded.is_enabled(StorageCategory::Async));
        assert!(loaded.is_enabled(StorageCategory::Secure));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");

        {
            let prefs = SqlitePreferences::open(&path).unwrap();
            prefs
                .save_category(StorageCategory::Async, false)
                .await
                .unwrap();
        }

        let prefs = SqlitePreferences::open(&path).unwrap();
        let loaded = prefs.load_categories().await.unwrap();
        assert!(!loaded.is_enabled(StorageCategory::Async));
        assert!(loaded.is_enabled(StorageCategory::Mmkv));
    }

    #[tokio::test]
    async fn test_corrupt_rows_read_as_enabled() {
        let prefs = SqlitePreferences::open_memory().unwrap();
        prefs
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO storage_preferences VALUES ('mmkv', 'banana', 0);
                     INSERT INTO storage_preferences VALUES ('floppy', 0, 0);
                     INSERT INTO storage_preferences VALUES ('async', 0, 0);",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let loaded = prefs.load_categories().await.unwrap();
        assert!(loaded.is_enabled(StorageCategory::Mmkv));
        assert!(!loaded.is_enabled(StorageCategory::Async));
        assert!(loaded.is_enabled(StorageCategory::Secure));
    }
}
