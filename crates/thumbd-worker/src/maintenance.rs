//! Periodic housekeeping: cache pruning and resource resets.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::json;
use thumbd_models::{MaintenanceMeta, CLEANING_TASK};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::error::WorkerResult;
use crate::events::{MAINTENANCE_AFTER_RESET, MAINTENANCE_BEFORE_RESET};

/// Cached files younger than this are kept.
pub const CACHE_RETENTION: Duration = Duration::from_secs(2 * 24 * 3600);

/// How far in the future a recorded run may lie before it is distrusted.
pub const FUTURE_SKEW_TOLERANCE: Duration = Duration::from_secs(3600);

/// What one prune pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub files: usize,
    pub dirs: usize,
}

/// Whether a task last run at `last_run` should run again at `now`.
///
/// Never-run tasks are due, as are tasks whose recorded run lies more than
/// [`FUTURE_SKEW_TOLERANCE`] in the future.
pub fn is_due(last_run: Option<DateTime<Utc>>, now: DateTime<Utc>, period: Duration) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };
    let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::MAX);
    let skew = chrono::Duration::from_std(FUTURE_SKEW_TOLERANCE).unwrap_or(chrono::Duration::MAX);

    let elapsed = last_run
        .checked_add_signed(period)
        .is_some_and(|next| now > next);
    let future_dated = last_run
        .checked_sub_signed(skew)
        .is_some_and(|earliest| earliest > now);
    elapsed || future_dated
}

/// Delete files under `dirs` older than `retention` and owned by `uid`,
/// then remove subdirectories left empty. The roots themselves stay.
///
/// Unreadable entries are skipped.
pub fn prune_cache(dirs: &[PathBuf], retention: Duration, uid: u32, now: SystemTime) -> PruneReport {
    let mut report = PruneReport::default();
    let Some(cutoff) = now.checked_sub(retention) else {
        return report;
    };

    for root in dirs {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(root)
            .min_depth(1)
            .contents_first(true)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };

            if meta.is_dir() {
                if std::fs::remove_dir(path).is_ok() {
                    report.dirs += 1;
                }
                continue;
            }

            let old_enough = meta.modified().is_ok_and(|modified| modified < cutoff);
            if meta.uid() == uid && old_enough && std::fs::remove_file(path).is_ok() {
                report.files += 1;
            }
        }
    }
    report
}

/// Run the cache prune if it is due, recording the run first.
///
/// Returns whether a prune ran.
pub async fn maybe_run(ctx: &AppContext, now: DateTime<Utc>) -> WorkerResult<bool> {
    let last_run = ctx
        .meta
        .get(CLEANING_TASK)
        .await?
        .and_then(|meta| meta.last_run());

    if !is_due(last_run, now, ctx.config.clean_period) {
        debug!(last_run = ?last_run, "Cache prune not due");
        return Ok(false);
    }

    // Recorded before pruning so a crash does not retrigger immediately
    ctx.meta
        .upsert(&MaintenanceMeta::new(CLEANING_TASK, now))
        .await?;

    let dirs = ctx.config.paths.cache_dirs();
    let uid = nix::unistd::geteuid().as_raw();
    let report = tokio::task::spawn_blocking(move || {
        prune_cache(&dirs, CACHE_RETENTION, uid, SystemTime::now())
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Cache prune task failed: {}", e);
        PruneReport::default()
    });

    counter!("thumbd_maintenance_runs_total").increment(1);
    info!(
        files = report.files,
        dirs = report.dirs,
        "Pruned cache directories"
    );
    Ok(true)
}

/// Release pooled connections and cached clients.
pub async fn reset_resources(ctx: &AppContext) {
    ctx.events.publish(MAINTENANCE_BEFORE_RESET, json!({}), &[]);
    ctx.close().await;
    ctx.events.publish(MAINTENANCE_AFTER_RESET, json!({}), &[]);
    debug!("Resources reset");
}
