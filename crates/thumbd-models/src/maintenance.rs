//! Local maintenance bookkeeping.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Task name under which the cache cleanup stores its last run.
pub const CLEANING_TASK: &str = "cleaning";

/// One row of the local `meta` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceMeta {
    pub task_name: String,
    /// Last run as a Unix timestamp in text form
    pub result: Option<String>,
}

impl MaintenanceMeta {
    pub fn new(task_name: impl Into<String>, last_run: DateTime<Utc>) -> Self {
        Self {
            task_name: task_name.into(),
            result: Some(last_run.timestamp().to_string()),
        }
    }

    /// Parsed last run, `None` when missing or not a timestamp.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        let secs = self.result.as_deref()?.trim().parse::<i64>().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}
