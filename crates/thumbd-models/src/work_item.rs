//! Rows of the shared work table.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::task_status::{StoredStatus, TaskStatus};

/// Default name of the work table.
pub const WORK_TABLE: &str = "contents";

/// Columns the worker reads or writes. All must exist for the worker to start.
pub const WORK_TABLE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "contentUrl",
    "task_status",
    "retry_status",
    "source_url",
    "source_type",
    "generate_thumbnail_status",
    "coverImage",
    "updatedAt",
];

/// Extensions the worker can derive a thumbnail from.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "mp4", "jpg", "png", "jpeg", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v",
];

/// Extensions fetched directly as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Pattern a content URL must match to be selected.
///
/// Written in the common subset of Postgres ARE and the `regex` crate so the
/// same text drives the SQL predicate and the in-process one. Matched
/// case-insensitively on both sides.
pub fn content_url_pattern() -> String {
    format!(
        r"^\s*https?://[^/]+/.+\.({})(\?.*)?$",
        SOURCE_EXTENSIONS.join("|")
    )
}

fn content_url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(&content_url_pattern())
            .case_insensitive(true)
            .build()
            .ok()
    })
    .as_ref()
}

/// How the source of a row is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Downloaded and resized directly
    Image,
    /// Downloaded, then a single frame is extracted
    Video,
}

impl ContentKind {
    /// Classify a content URL, `None` when it is not a supported source.
    pub fn from_url(url: &str) -> Option<Self> {
        let caps = content_url_regex()?.captures(url)?;
        let ext = caps.get(1)?.as_str().to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentKind::Image)
        } else {
            Some(ContentKind::Video)
        }
    }
}

/// A row of the work table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub name: Option<String>,
    /// Source the thumbnail is derived from
    pub content_url: Option<String>,
    /// Raw status column, see [`WorkItem::status`]
    pub task_status: Option<String>,
    /// Attempt counter, `-1` disables retries
    pub retry_status: Option<i32>,
    pub source_url: Option<String>,
    pub source_type: Option<String>,
    /// Set once a thumbnail has been stored
    pub generate_thumbnail_status: Option<bool>,
    /// Public reference of the stored thumbnail
    pub cover_image: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(id: i64, content_url: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: None,
            content_url: Some(content_url.into()),
            task_status: None,
            retry_status: None,
            source_url: None,
            source_type: None,
            generate_thumbnail_status: None,
            cover_image: None,
            updated_at,
        }
    }

    pub fn status(&self) -> StoredStatus {
        StoredStatus::parse(self.task_status.as_deref())
    }

    pub fn task_status_kind(&self) -> TaskStatus {
        TaskStatus::classify(self.task_status.as_deref())
    }

    /// Trimmed content URL.
    pub fn content_url(&self) -> Option<&str> {
        self.content_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn content_kind(&self) -> Option<ContentKind> {
        self.content_url().and_then(ContentKind::from_url)
    }

    /// Whether a thumbnail was already produced for this row.
    pub fn has_thumbnail(&self) -> bool {
        self.generate_thumbnail_status.unwrap_or(false)
            || self
                .cover_image
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Retry counter after a claim.
    ///
    /// Negative counters mark rows that get exactly one attempt and are
    /// kept as they are, so a failure is never selected again.
    pub fn next_retry(&self) -> i32 {
        match self.retry_status {
            Some(r) if r < 0 => r,
            r => r.unwrap_or(0) + 1,
        }
    }
}
