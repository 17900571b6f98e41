//! Storage seams used by the worker.

use async_trait::async_trait;
use thumbd_models::{MaintenanceMeta, StoredStatus, WorkItem};

use crate::error::QueueResult;
use crate::policy::ClaimPolicy;

/// The shared work table.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> QueueResult<()>;

    async fn table_exists(&self) -> QueueResult<bool>;

    /// Required columns absent from the work table.
    async fn missing_columns(&self, columns: &[&str]) -> QueueResult<Vec<String>>;

    /// Next eligible row under `policy`, oldest first.
    async fn select_next(&self, policy: &ClaimPolicy) -> QueueResult<Option<WorkItem>>;

    /// Mark `item` as processing and bump its retry counter.
    ///
    /// Only applies when the row still has the status and counter observed
    /// at selection. Returns `false` when a sibling changed it first.
    async fn claim(&self, item: &WorkItem) -> QueueResult<bool>;

    /// Overwrite the status column.
    async fn set_status(&self, id: i64, status: &StoredStatus) -> QueueResult<()>;

    /// Record a stored thumbnail and mark the row successful.
    async fn complete(&self, id: i64, cover_image: &str) -> QueueResult<()>;

    /// Release pooled connections; the next call reconnects.
    async fn reset(&self);
}

/// Local maintenance bookkeeping.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> QueueResult<()>;

    async fn get(&self, task_name: &str) -> QueueResult<Option<MaintenanceMeta>>;

    /// Insert or replace the row for `meta.task_name`.
    async fn upsert(&self, meta: &MaintenanceMeta) -> QueueResult<()>;

    /// Release pooled connections; the next call reconnects.
    async fn reset(&self);
}
