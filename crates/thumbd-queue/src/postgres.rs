//! Postgres-backed work store.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::FromRow;
use thumbd_models::{
    content_url_pattern, StoredStatus, WorkItem, ERROR_KEYWORD, TRANSIENT_FAILURE_KEYWORD,
    WORK_TABLE,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::policy::{in_flight_or_terminal_pattern, ClaimPolicy};
use crate::store::WorkStore;

/// Connection settings for the work database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Work table name
    pub table: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("table", &self.table)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            table: WORK_TABLE.to_string(),
        }
    }
}

impl DatabaseConfig {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .application_name("thumbd")
    }
}

fn identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
}

/// Validate a table name before it is spliced into SQL.
pub fn validate_identifier(name: &str) -> QueueResult<()> {
    if identifier_regex().is_some_and(|re| re.is_match(name)) {
        Ok(())
    } else {
        Err(QueueError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, FromRow)]
struct WorkRow {
    id: i64,
    name: Option<String>,
    content_url: Option<String>,
    task_status: Option<String>,
    retry_status: Option<i32>,
    source_url: Option<String>,
    source_type: Option<String>,
    generate_thumbnail_status: Option<bool>,
    cover_image: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<WorkRow> for WorkItem {
    fn from(row: WorkRow) -> Self {
        WorkItem {
            id: row.id,
            name: row.name,
            content_url: row.content_url,
            task_status: row.task_status,
            retry_status: row.retry_status,
            source_url: row.source_url,
            source_type: row.source_type,
            generate_thumbnail_status: row.generate_thumbnail_status,
            cover_image: row.cover_image,
            updated_at: row.updated_at,
        }
    }
}

/// Selection query for `table`.
///
/// Binds: `$1` content URL pattern, `$2` recency days, `$3` max retry,
/// `$4` in-flight/terminal keyword pattern.
pub fn selection_sql(table: &str) -> String {
    format!(
        r#"SELECT id::bigint AS id,
       name::text AS name,
       "contentUrl"::text AS content_url,
       task_status::text AS task_status,
       retry_status::integer AS retry_status,
       source_url::text AS source_url,
       source_type::text AS source_type,
       generate_thumbnail_status::boolean AS generate_thumbnail_status,
       "coverImage"::text AS cover_image,
       "updatedAt"::timestamptz AS updated_at
FROM "{table}"
WHERE TRIM("contentUrl") ~* $1
  AND "updatedAt" >= NOW() - make_interval(days => $2)
  AND (task_status IS NULL OR task_status NOT ILIKE '%{error}%')
  AND (
        task_status IS NULL
        OR TRIM(task_status) = ''
        OR (
            task_status ILIKE '%{fail}%'
            AND (retry_status IS NULL OR (retry_status >= 0 AND retry_status < $3))
        )
      )
  AND (task_status IS NULL OR task_status !~* $4)
  AND (generate_thumbnail_status IS NULL OR generate_thumbnail_status = false)
  AND ("coverImage" IS NULL OR TRIM("coverImage") = '')
ORDER BY "updatedAt" ASC, COALESCE(retry_status, 0) ASC, id ASC
LIMIT 1"#,
        table = table,
        error = ERROR_KEYWORD,
        fail = TRANSIENT_FAILURE_KEYWORD,
    )
}

/// Claim statement for `table`, guarded by the observed status and counter.
///
/// Binds: `$1` new status, `$2` new counter, `$3` id, `$4` observed status,
/// `$5` observed counter.
pub fn claim_sql(table: &str) -> String {
    format!(
        r#"UPDATE "{table}"
SET task_status = $1, retry_status = $2, generate_thumbnail_status = false
WHERE id = $3
  AND task_status IS NOT DISTINCT FROM $4
  AND retry_status IS NOT DISTINCT FROM $5"#
    )
}

/// Work store on a Postgres table.
pub struct PgWorkStore {
    config: DatabaseConfig,
    pool: Mutex<Option<PgPool>>,
}

impl PgWorkStore {
    /// Create a store. No connection is opened until first use.
    pub fn new(config: DatabaseConfig) -> QueueResult<Self> {
        validate_identifier(&config.table)?;
        Ok(Self {
            config,
            pool: Mutex::new(None),
        })
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    async fn pool(&self) -> QueueResult<PgPool> {
        let mut slot = self.pool.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        debug!(
            host = %self.config.host,
            database = %self.config.database,
            "Opening Postgres pool"
        );
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(self.config.connect_options())
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        *slot = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl WorkStore for PgWorkStore {
    async fn ping(&self) -> QueueResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    async fn table_exists(&self) -> QueueResult<bool> {
        let pool = self.pool().await?;
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(&self.config.table)
        .fetch_one(&pool)
        .await?;
        Ok(exists)
    }

    async fn missing_columns(&self, columns: &[&str]) -> QueueResult<Vec<String>> {
        let pool = self.pool().await?;
        let present: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind(&self.config.table)
        .fetch_all(&pool)
        .await?;

        Ok(columns
            .iter()
            .filter(|c| !present.iter().any(|p| p == *c))
            .map(|c| c.to_string())
            .collect())
    }

    async fn select_next(&self, policy: &ClaimPolicy) -> QueueResult<Option<WorkItem>> {
        let pool = self.pool().await?;
        let days = i32::try_from(policy.recency_days).unwrap_or(i32::MAX);

        let row: Option<WorkRow> = sqlx::query_as(&selection_sql(&self.config.table))
            .bind(content_url_pattern())
            .bind(days)
            .bind(policy.max_retry)
            .bind(in_flight_or_terminal_pattern())
            .fetch_optional(&pool)
            .await?;

        Ok(row.map(WorkItem::from))
    }

    async fn claim(&self, item: &WorkItem) -> QueueResult<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query(&claim_sql(&self.config.table))
            .bind(StoredStatus::processing().to_storage())
            .bind(item.next_retry())
            .bind(item.id)
            .bind(item.task_status.as_deref())
            .bind(item.retry_status)
            .execute(&pool)
            .await?;

        let claimed = result.rows_affected() == 1;
        if !claimed {
            info!(item_id = item.id, "Row changed since selection, claim skipped");
        }
        Ok(claimed)
    }

    async fn set_status(&self, id: i64, status: &StoredStatus) -> QueueResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            r#"UPDATE "{}" SET task_status = $1 WHERE id = $2"#,
            self.config.table
        );
        sqlx::query(&sql)
            .bind(status.to_storage())
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: i64, cover_image: &str) -> QueueResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            r#"UPDATE "{}"
SET task_status = $1, "coverImage" = $2, generate_thumbnail_status = true
WHERE id = $3"#,
            self.config.table
        );
        sqlx::query(&sql)
            .bind(StoredStatus::success().to_storage())
            .bind(cover_image)
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn reset(&self) {
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!("Closed Postgres pool");
        }
    }
}
