//! In-memory stores for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use thumbd_models::{MaintenanceMeta, StoredStatus, WorkItem, WORK_TABLE_COLUMNS};

use crate::error::{QueueError, QueueResult};
use crate::policy::ClaimPolicy;
use crate::store::{MetaStore, WorkStore};

/// Work table held in a map, applying [`ClaimPolicy`] in process.
#[derive(Default)]
pub struct MemoryWorkStore {
    rows: Mutex<BTreeMap<i64, WorkItem>>,
    columns: Mutex<Option<Vec<String>>>,
    status_log: Mutex<Vec<(i64, String)>>,
}

impl MemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<i64, WorkItem>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, item: WorkItem) {
        self.rows().insert(item.id, item);
    }

    /// Snapshot of a row.
    pub fn get(&self, id: i64) -> Option<WorkItem> {
        self.rows().get(&id).cloned()
    }

    /// Pretend the table only has `columns`.
    pub fn set_columns(&self, columns: Vec<String>) {
        *self.columns.lock().unwrap_or_else(PoisonError::into_inner) = Some(columns);
    }

    /// Every status written through [`WorkStore::set_status`], in order.
    pub fn status_history(&self, id: i64) -> Vec<String> {
        self.status_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(row, _)| *row == id)
            .map(|(_, status)| status.clone())
            .collect()
    }
}

#[async_trait]
impl WorkStore for MemoryWorkStore {
    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn table_exists(&self) -> QueueResult<bool> {
        Ok(true)
    }

    async fn missing_columns(&self, columns: &[&str]) -> QueueResult<Vec<String>> {
        let present = self
            .columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| WORK_TABLE_COLUMNS.iter().map(|c| c.to_string()).collect());
        Ok(columns
            .iter()
            .filter(|c| !present.iter().any(|p| p == *c))
            .map(|c| c.to_string())
            .collect())
    }

    async fn select_next(&self, policy: &ClaimPolicy) -> QueueResult<Option<WorkItem>> {
        let rows = self.rows();
        Ok(policy.select(rows.values(), Utc::now()).cloned())
    }

    async fn claim(&self, item: &WorkItem) -> QueueResult<bool> {
        let mut rows = self.rows();
        let Some(row) = rows.get_mut(&item.id) else {
            return Ok(false);
        };
        if row.task_status != item.task_status || row.retry_status != item.retry_status {
            return Ok(false);
        }
        row.task_status = Some(StoredStatus::processing().to_storage());
        row.retry_status = Some(item.next_retry());
        row.generate_thumbnail_status = Some(false);
        Ok(true)
    }

    async fn set_status(&self, id: i64, status: &StoredStatus) -> QueueResult<()> {
        let value = status.to_storage();
        if let Some(row) = self.rows().get_mut(&id) {
            row.task_status = Some(value.clone());
        }
        self.status_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, value));
        Ok(())
    }

    async fn complete(&self, id: i64, cover_image: &str) -> QueueResult<()> {
        if let Some(row) = self.rows().get_mut(&id) {
            row.task_status = Some(StoredStatus::success().to_storage());
            row.cover_image = Some(cover_image.to_string());
            row.generate_thumbnail_status = Some(true);
        }
        Ok(())
    }

    async fn reset(&self) {}
}

/// Meta table held in a map.
#[derive(Default)]
pub struct MemoryMetaStore {
    rows: Mutex<HashMap<String, MaintenanceMeta>>,
    unavailable: AtomicBool,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ping` fail, as an unreachable database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn ping(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("meta store unavailable"));
        }
        Ok(())
    }

    async fn get(&self, task_name: &str) -> QueueResult<Option<MaintenanceMeta>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_name)
            .cloned())
    }

    async fn upsert(&self, meta: &MaintenanceMeta) -> QueueResult<()> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(meta.task_name.clone(), meta.clone());
        Ok(())
    }

    async fn reset(&self) {}
}
