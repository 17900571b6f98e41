//! Shared data models for the thumbd worker.
//!
//! This crate provides Serde-serializable types for:
//! - Work table rows and their status codec
//! - OS process records
//! - Local maintenance bookkeeping

pub mod maintenance;
pub mod process;
pub mod task_status;
pub mod work_item;

// Re-export common types
pub use maintenance::{MaintenanceMeta, CLEANING_TASK};
pub use process::ProcessRecord;
pub use task_status::{
    StoredStatus, TaskStatus, ERROR_KEYWORD, IN_FLIGHT_OR_TERMINAL_KEYWORDS,
    TRANSIENT_FAILURE_KEYWORD,
};
pub use work_item::{
    content_url_pattern, ContentKind, WorkItem, IMAGE_EXTENSIONS, SOURCE_EXTENSIONS, WORK_TABLE,
    WORK_TABLE_COLUMNS,
};
