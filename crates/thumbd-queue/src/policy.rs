//! Which rows may be claimed, and in what order.
//!
//! [`ClaimPolicy::is_eligible`] is the in-process mirror of the SQL built in
//! [`crate::postgres`]; both are derived from the same keyword constants.

use std::cmp::Ordering;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thumbd_models::{
    content_url_pattern, TaskStatus, WorkItem, IN_FLIGHT_OR_TERMINAL_KEYWORDS,
};

pub const DEFAULT_MAX_RETRY: i32 = 3;
pub const DEFAULT_RECENCY_DAYS: u32 = 3;

/// Alternation of in-flight and terminal keywords, for `~*` and `regex`.
pub fn in_flight_or_terminal_pattern() -> String {
    format!("({})", IN_FLIGHT_OR_TERMINAL_KEYWORDS.join("|"))
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

/// Retry cap and recency window applied when selecting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPolicy {
    /// Rows whose counter reached this value are not retried
    pub max_retry: i32,
    /// Rows not updated within this many days are considered abandoned
    pub recency_days: u32,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            recency_days: DEFAULT_RECENCY_DAYS,
        }
    }
}

impl ClaimPolicy {
    pub fn new(max_retry: i32, recency_days: u32) -> Self {
        Self {
            max_retry,
            recency_days,
        }
    }

    /// Oldest `updated_at` still inside the window.
    pub fn recency_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.recency_days))
    }

    /// Whether `item` satisfies every selection condition at `now`.
    pub fn is_eligible(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        let url_ok = item
            .content_url()
            .is_some_and(|url| content_url_regex().is_some_and(|re| re.is_match(url)));
        if !url_ok {
            return false;
        }

        if item.updated_at < self.recency_cutoff(now) {
            return false;
        }

        if item.has_thumbnail() {
            return false;
        }

        TaskStatus::classify(item.task_status.as_deref())
            .is_claimable(item.retry_status, self.max_retry)
    }

    /// Selection order: oldest update first, then fewest attempts.
    pub fn compare(a: &WorkItem, b: &WorkItem) -> Ordering {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.retry_status.unwrap_or(0).cmp(&b.retry_status.unwrap_or(0)))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// The row a worker would claim next out of `items`.
    pub fn select<'a, I>(&self, items: I, now: DateTime<Utc>) -> Option<&'a WorkItem>
    where
        I: IntoIterator<Item = &'a WorkItem>,
    {
        items
            .into_iter()
            .filter(|item| self.is_eligible(item, now))
            .min_by(|a, b| Self::compare(a, b))
    }
}
