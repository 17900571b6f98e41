//! Claim one row and turn its content into a stored thumbnail.
//!
//! Per call: select the next eligible row, claim it (compare-and-set on
//! the observed status and counter), fetch the source, crop it to the
//! configured box, upload it, and write the outcome back. Pipeline
//! failures never escape [`run_once`]; they become the row's status.
//! Only store errors around selection and resolution are returned.

use std::path::{Path, PathBuf};
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::{json, Value};
use thumbd_media::fs_utils::{extension_from_url, remove_file_quietly};
use thumbd_media::{HttpDownload, ProgressThrottle, MAX_IMAGE_BYTES, MAX_VIDEO_BYTES};
use thumbd_models::{ContentKind, StoredStatus, WorkItem};
use thumbd_queue::QueueError;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::{WorkerError, WorkerResult};
use crate::events::{DOWNLOAD_PROGRESS, UPLOAD_BEFORE, UPLOAD_ERROR, UPLOAD_KEY, UPLOAD_SUCCESS};
use crate::logging::{ItemLogger, Stage};

/// What one [`run_once`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No eligible row
    Idle,
    /// Upload credentials were rejected earlier; nothing is claimed
    Paused,
    /// Another process changed the row between selection and claim
    Lost(i64),
    Succeeded { id: i64, cover_image: String },
    Failed { id: i64, status: String },
}

/// Files created while processing one row, removed once it is resolved.
#[derive(Debug, Default)]
struct ScratchFiles(Vec<PathBuf>);

impl ScratchFiles {
    fn track(&mut self, path: PathBuf) {
        self.0.push(path);
    }

    async fn cleanup(self) {
        for path in self.0 {
            remove_file_quietly(&path).await;
        }
    }
}

/// Process at most one row.
pub async fn run_once(ctx: &AppContext) -> WorkerResult<RunOutcome> {
    if ctx.uploader.is_unauthenticated() {
        debug!("Upload credentials rejected, not claiming work");
        return Ok(RunOutcome::Paused);
    }

    let Some(item) = ctx.work.select_next(&ctx.config.claim_policy()).await? else {
        return Ok(RunOutcome::Idle);
    };

    if !ctx.work.claim(&item).await? {
        counter!("thumbd_claim_conflicts_total").increment(1);
        return Ok(RunOutcome::Lost(item.id));
    }
    counter!("thumbd_items_claimed_total").increment(1);

    let logger = ItemLogger::new(item.id);
    let span = logger.span();
    resolve_claimed(ctx, &item, &logger).instrument(span).await
}

async fn resolve_claimed(
    ctx: &AppContext,
    item: &WorkItem,
    logger: &ItemLogger,
) -> WorkerResult<RunOutcome> {
    logger.claimed(item.content_url().unwrap_or("<missing content URL>"));
    let started = Instant::now();
    let mut scratch = ScratchFiles::default();

    let result = process(ctx, item, logger, &mut scratch).await;

    let (recorded, outcome) = match result {
        Ok(cover_image) => {
            let recorded = ctx.work.complete(item.id, &cover_image).await;
            logger.succeeded(&cover_image);
            counter!("thumbd_items_resolved_total", "outcome" => "success").increment(1);
            let outcome = RunOutcome::Succeeded {
                id: item.id,
                cover_image,
            };
            (recorded, outcome)
        }
        Err(e) => {
            let status = e.status_for();
            logger.failed(&status.to_storage(), &e.to_string());
            let label = if e.is_unauthenticated() {
                "unauthenticated"
            } else if e.is_retryable() {
                "failed"
            } else {
                "error"
            };
            counter!("thumbd_items_resolved_total", "outcome" => label).increment(1);
            let recorded = ctx.work.set_status(item.id, &status).await;
            let outcome = RunOutcome::Failed {
                id: item.id,
                status: status.to_storage(),
            };
            (recorded, outcome)
        }
    };

    scratch.cleanup().await;
    histogram!("thumbd_pipeline_duration_seconds").record(started.elapsed().as_secs_f64());

    if let Err(e) = recorded {
        release_unrecorded(ctx, item.id, &e).await;
        return Err(e.into());
    }
    Ok(outcome)
}

/// The row is still marked in progress, which selection never picks up.
/// Try once to hand it back as a transient failure.
async fn release_unrecorded(ctx: &AppContext, id: i64, cause: &QueueError) {
    error!(item_id = id, "Could not record the outcome: {}", cause);
    let fallback = StoredStatus::failed(format!("outcome not recorded: {}", cause));
    match ctx.work.set_status(id, &fallback).await {
        Ok(()) => warn!(item_id = id, "Row released as Failed"),
        Err(e) => {
            counter!("thumbd_items_stuck_total").increment(1);
            error!(item_id = id, "Row left in progress: {}", e);
        }
    }
}

/// Fetch, transform and upload; returns the public reference.
async fn process(
    ctx: &AppContext,
    item: &WorkItem,
    logger: &ItemLogger,
    scratch: &mut ScratchFiles,
) -> WorkerResult<String> {
    let url = item
        .content_url()
        .ok_or_else(|| WorkerError::unsupported_content("missing content URL"))?;
    let kind = item
        .content_kind()
        .ok_or_else(|| WorkerError::unsupported_content(format!("unsupported source {}", url)))?;

    let paths = &ctx.config.paths;
    logger.stage(Stage::Download, url);
    let source = match kind {
        ContentKind::Image => {
            download(ctx, item, url, &paths.image_dir(), MAX_IMAGE_BYTES, scratch).await?
        }
        ContentKind::Video => {
            let video =
                download(ctx, item, url, &paths.video_dir(), MAX_VIDEO_BYTES, scratch).await?;
            logger.stage(Stage::Frame, "extracting frame");
            let frame = ctx
                .frames
                .representative_frame(&video, ctx.config.screen_shot.second, &paths.image_dir())
                .await?;
            scratch.track(frame.clone());
            frame
        }
    };

    logger.stage(Stage::Thumbnail, "generating thumbnail");
    let thumbnail = ctx.thumbnails.generate(&source, &paths.resize_dir()).await?;
    scratch.track(thumbnail.path.clone());

    upload(ctx, item, &thumbnail.path, logger).await
}

/// Stream `url` into `dir`, persisting progress once per 10 % bucket.
/// Without a content length only byte counts are published.
async fn download(
    ctx: &AppContext,
    item: &WorkItem,
    url: &str,
    dir: &Path,
    limit: u64,
    scratch: &mut ScratchFiles,
) -> WorkerResult<PathBuf> {
    let ext = extension_from_url(url).unwrap_or_else(|| "bin".to_string());
    let dest = dir.join(format!("{}-{}.{}", item.id, Uuid::new_v4().simple(), ext));
    scratch.track(dest.clone());

    let mut download = HttpDownload::start(&ctx.http, url, &dest, limit).await?;
    let mut throttle = ProgressThrottle::default();

    while let Some(progress) = download.advance().await? {
        if !throttle.should_report(&progress) {
            continue;
        }
        // percent is null while the server has not sent a length
        let percent = progress.percent();
        ctx.events.publish(
            DOWNLOAD_PROGRESS,
            json!({
                "item_id": item.id,
                "downloaded": progress.downloaded,
                "total": progress.total,
                "percent": percent,
            }),
            &[],
        );
        if let Some(percent) = percent {
            ctx.work
                .set_status(item.id, &StoredStatus::downloading(percent))
                .await?;
        }
    }

    Ok(dest)
}

async fn upload(
    ctx: &AppContext,
    item: &WorkItem,
    local: &Path,
    logger: &ItemLogger,
) -> WorkerResult<String> {
    let basename = local
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WorkerError::unsupported_content("thumbnail has no file name"))?;

    let default_key = ctx.config.aws.thumbnail_key(item.id, basename);
    let key = match ctx
        .events
        .publish(UPLOAD_KEY, json!(default_key), &[json!(item.id)])
    {
        Value::String(key) if !key.trim().is_empty() => key,
        _ => default_key,
    };

    let details = json!({
        "item_id": item.id,
        "key": key,
        "path": local.display().to_string(),
    });
    ctx.events.publish(UPLOAD_BEFORE, details.clone(), &[]);
    logger.stage(Stage::Upload, &format!("uploading {}", key));

    match ctx.uploader.upload(local, &key).await {
        Ok(object) => {
            ctx.events.publish(
                UPLOAD_SUCCESS,
                json!({"item_id": item.id, "key": object.key, "url": object.url}),
                &[],
            );
            Ok(object.url)
        }
        Err(e) => {
            ctx.events.publish(UPLOAD_ERROR, details, &[json!(e.to_string())]);
            Err(e.into())
        }
    }
}
