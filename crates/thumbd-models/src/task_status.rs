//! Work row status.
//!
//! The `task_status` column is free text written by several producers.
//! Inside the worker it is always handled as a closed [`TaskStatus`] plus an
//! optional human-readable detail; the legacy strings only exist at the
//! storage boundary (see [`StoredStatus::parse`] and its `Display` impl).

use serde::{Deserialize, Serialize};

/// Substring that marks a permanent error. Rows carrying it are never reselected.
pub const ERROR_KEYWORD: &str = "error";

/// Substring that marks a transient failure eligible for retry.
pub const TRANSIENT_FAILURE_KEYWORD: &str = "fail";

/// Substrings that mark a row as in progress or already terminal.
///
/// Matched case-insensitively. The order is irrelevant for matching but is
/// also the order used to build the SQL alternation.
pub const IN_FLIGHT_OR_TERMINAL_KEYWORDS: &[&str] = &[
    "skipped", "process", "download", "finish", "upload", "success", "succeed",
];

/// Maximum length of a detail written into the status column.
const MAX_DETAIL_LEN: usize = 200;

/// Closed set of row states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Never attempted (null or blank column)
    Pending,
    /// Claimed by a worker
    Processing,
    /// Source download in progress
    Downloading,
    /// Artifact upload in progress
    Uploading,
    /// Explicitly skipped by a producer
    Skipped,
    /// Thumbnail stored and referenced
    Success,
    /// Transient failure, retried while the retry counter allows it
    Failed,
    /// Permanent failure, never retried
    Error,
    /// Any other producer-written text
    Unrecognized,
}

impl TaskStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Error => "error",
            TaskStatus::Unrecognized => "unrecognized",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error | TaskStatus::Skipped)
    }

    /// Check if a worker currently owns the row.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskStatus::Processing | TaskStatus::Downloading | TaskStatus::Uploading
        )
    }

    /// Classify a raw column value.
    ///
    /// Precedence follows the selection predicate: the error keyword wins,
    /// then in-flight/terminal keywords, then the transient failure keyword.
    pub fn classify(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return TaskStatus::Pending;
        };
        let lower = raw.to_lowercase();

        if lower.contains(ERROR_KEYWORD) {
            return TaskStatus::Error;
        }
        if lower.contains("skipped") {
            return TaskStatus::Skipped;
        }
        if lower.contains("process") {
            return TaskStatus::Processing;
        }
        if lower.contains("download") {
            return TaskStatus::Downloading;
        }
        if lower.contains("upload") {
            return TaskStatus::Uploading;
        }
        if lower.contains("finish") || lower.contains("success") || lower.contains("succeed") {
            return TaskStatus::Success;
        }
        if lower.contains(TRANSIENT_FAILURE_KEYWORD) {
            return TaskStatus::Failed;
        }
        TaskStatus::Unrecognized
    }

    /// Whether a row in this state may be claimed given its retry counter.
    ///
    /// `-1` means "do not retry"; any negative counter is treated the same.
    pub fn is_claimable(&self, retry_status: Option<i32>, max_retry: i32) -> bool {
        match self {
            TaskStatus::Pending => true,
            TaskStatus::Failed => retry_status.map_or(true, |r| (0..max_retry).contains(&r)),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A status plus its free-text detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStatus {
    pub status: TaskStatus,
    pub detail: Option<String>,
}

impl StoredStatus {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn with_detail(status: TaskStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(sanitize_detail(&detail.into())),
        }
    }

    pub fn processing() -> Self {
        Self::new(TaskStatus::Processing)
    }

    /// Download progress, `percent` is clamped to 100.
    pub fn downloading(percent: u8) -> Self {
        Self::with_detail(TaskStatus::Downloading, format!("{}%", percent.min(100)))
    }

    pub fn success() -> Self {
        Self::new(TaskStatus::Success)
    }

    /// Transient failure. The detail is kept for logs only, the column
    /// always receives the bare `Failed` marker so the row stays retryable.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::with_detail(TaskStatus::Failed, detail)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::with_detail(TaskStatus::Error, detail)
    }

    /// Parse a raw column value.
    pub fn parse(raw: Option<&str>) -> Self {
        let status = TaskStatus::classify(raw);
        let raw = raw.map(str::trim).unwrap_or_default();

        let detail = match status {
            TaskStatus::Pending => None,
            TaskStatus::Error => raw
                .split_once(':')
                .map(|(_, rest)| rest.trim())
                .filter(|rest| !rest.is_empty())
                .map(str::to_string),
            TaskStatus::Downloading => raw
                .split_whitespace()
                .nth(1)
                .map(str::to_string),
            TaskStatus::Unrecognized => Some(raw.to_string()),
            _ => None,
        };

        Self { status, detail }
    }

    /// The value written into the `task_status` column.
    pub fn to_storage(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for StoredStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.detail.as_deref()) {
            (TaskStatus::Pending, _) => Ok(()),
            (TaskStatus::Processing, _) => write!(f, "Processing"),
            (TaskStatus::Downloading, Some(progress)) => write!(f, "Downloading {}", progress),
            (TaskStatus::Downloading, None) => write!(f, "Downloading"),
            (TaskStatus::Uploading, _) => write!(f, "Uploading"),
            (TaskStatus::Skipped, _) => write!(f, "Skipped"),
            (TaskStatus::Success, _) => write!(f, "Success"),
            (TaskStatus::Failed, _) => write!(f, "Failed"),
            (TaskStatus::Error, detail) => write!(f, "Error: {}", detail.unwrap_or("unknown")),
            (TaskStatus::Unrecognized, detail) => write!(f, "{}", detail.unwrap_or_default()),
        }
    }
}

/// Single line, bounded length.
fn sanitize_detail(detail: &str) -> String {
    let line: String = detail
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let line = line.trim();
    match line.char_indices().nth(MAX_DETAIL_LEN) {
        Some((idx, _)) => line[..idx].to_string(),
        None => line.to_string(),
    }
}
