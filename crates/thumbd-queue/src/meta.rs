//! SQLite-backed maintenance bookkeeping.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use thumbd_models::MaintenanceMeta;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::store::MetaStore;

const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT NOT NULL UNIQUE,
    result TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
"#;

const CREATE_META_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS meta_touch_updated_at
AFTER UPDATE ON meta
FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
BEGIN
    UPDATE meta SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = NEW.id;
END
"#;

enum Location {
    File(PathBuf),
    Memory,
}

/// Maintenance state in a local SQLite file.
pub struct SqliteMetaStore {
    location: Location,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteMetaStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let store = Self {
            location: Location::File(path.as_ref().to_path_buf()),
            pool: Mutex::new(None),
        };
        store.pool().await?;
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> QueueResult<Self> {
        let store = Self {
            location: Location::Memory,
            pool: Mutex::new(None),
        };
        store.pool().await?;
        Ok(store)
    }

    async fn connect(&self) -> QueueResult<SqlitePool> {
        let pool = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5));
                SqlitePoolOptions::new()
                    .max_connections(2)
                    .connect_with(options)
                    .await
                    .map_err(|e| {
                        QueueError::connection_failed(format!("{}: {}", path.display(), e))
                    })?
            }
            Location::Memory => {
                // Every connection to :memory: is a distinct database
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await
                    .map_err(|e| QueueError::connection_failed(e.to_string()))?
            }
        };

        sqlx::query(CREATE_META_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_META_TRIGGER).execute(&pool).await?;
        Ok(pool)
    }

    async fn pool(&self) -> QueueResult<SqlitePool> {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = self.connect().await?;
        *slot = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn ping(&self) -> QueueResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    async fn get(&self, task_name: &str) -> QueueResult<Option<MaintenanceMeta>> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT task_name, result FROM meta WHERE task_name = ?")
            .bind(task_name)
            .fetch_optional(&pool)
            .await?;

        Ok(row.map(|row| MaintenanceMeta {
            task_name: row.get("task_name"),
            result: row.get("result"),
        }))
    }

    async fn upsert(&self, meta: &MaintenanceMeta) -> QueueResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
INSERT INTO meta (task_name, result)
VALUES (?, ?)
ON CONFLICT(task_name) DO UPDATE SET
    result = excluded.result
            "#,
        )
        .bind(&meta.task_name)
        .bind(meta.result.as_deref())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn reset(&self) {
        // The in-memory database would be lost with its only connection
        if matches!(self.location, Location::Memory) {
            return;
        }
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!("Closed meta database pool");
        }
    }
}
