//! Claim, process and resolve rows against in-memory stores.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{files_under, png_bytes, HarnessBuilder, UploadMode};
use thumbd_models::{StoredStatus, WorkItem};
use thumbd_queue::{ClaimPolicy, MemoryWorkStore, QueueError, QueueResult, WorkStore};
use thumbd_worker::events::{DOWNLOAD_PROGRESS, UPLOAD_KEY, UPLOAD_SUCCESS};
use thumbd_worker::pipeline::{run_once, RunOutcome};

async fn serve(server: &MockServer, route: &str, status: u16, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
        .mount(server)
        .await;
}

fn row(id: i64, url: String) -> WorkItem {
    WorkItem::new(id, url, Utc::now() - Duration::minutes(5))
}

/// Memory store whose `complete` always fails.
struct CompleteFails(Arc<MemoryWorkStore>);

#[async_trait]
impl WorkStore for CompleteFails {
    async fn ping(&self) -> QueueResult<()> {
        self.0.ping().await
    }

    async fn table_exists(&self) -> QueueResult<bool> {
        self.0.table_exists().await
    }

    async fn missing_columns(&self, columns: &[&str]) -> QueueResult<Vec<String>> {
        self.0.missing_columns(columns).await
    }

    async fn select_next(&self, policy: &ClaimPolicy) -> QueueResult<Option<WorkItem>> {
        self.0.select_next(policy).await
    }

    async fn claim(&self, item: &WorkItem) -> QueueResult<bool> {
        self.0.claim(item).await
    }

    async fn set_status(&self, id: i64, status: &StoredStatus) -> QueueResult<()> {
        self.0.set_status(id, status).await
    }

    async fn complete(&self, _id: i64, _cover_image: &str) -> QueueResult<()> {
        Err(QueueError::connection_failed("connection reset"))
    }

    async fn reset(&self) {}
}

#[tokio::test]
async fn test_image_row_succeeds() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(800, 600)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(7, format!("{}/media/pic.png", server.uri())));

    let outcome = run_once(&h.ctx).await.unwrap();
    let RunOutcome::Succeeded { id, cover_image } = outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(id, 7);

    let keys = h.uploader.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("content/thumbnails/7/"));
    assert!(keys[0].ends_with(".jpg"));
    assert_eq!(cover_image, format!("https://cdn.test/{}", keys[0]));

    let stored = h.work.get(7).unwrap();
    assert_eq!(stored.task_status.as_deref(), Some("Success"));
    assert_eq!(stored.cover_image.as_deref(), Some(cover_image.as_str()));
    assert_eq!(stored.generate_thumbnail_status, Some(true));
    assert_eq!(stored.retry_status, Some(1));

    // Nothing left to do
    assert_eq!(run_once(&h.ctx).await.unwrap(), RunOutcome::Idle);
}

#[tokio::test]
async fn test_scratch_files_are_removed() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(1, format!("{}/media/pic.png", server.uri())));

    assert!(matches!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Succeeded { .. }
    ));
    assert!(files_under(&h.ctx.config.paths.cache_dir).is_empty());
}

#[tokio::test]
async fn test_video_row_uses_clamped_frame() {
    let server = MockServer::start().await;
    serve(&server, "/clips/intro.mp4", 200, b"not really a video".to_vec()).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(3, format!("{}/clips/intro.mp4", server.uri())));

    let outcome = run_once(&h.ctx).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Succeeded { id: 3, .. }), "{:?}", outcome);

    // Configured second is 3, the fake video lasts 2 seconds
    assert_eq!(*h.frames.requested.lock().unwrap(), vec![1]);
    assert!(files_under(&h.ctx.config.paths.cache_dir).is_empty());
}

#[tokio::test]
async fn test_download_failure_is_retryable() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 500, Vec::new()).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(2, format!("{}/media/pic.png", server.uri())));

    let outcome = run_once(&h.ctx).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            id: 2,
            status: "Failed".to_string()
        }
    );

    let stored = h.work.get(2).unwrap();
    assert_eq!(stored.task_status.as_deref(), Some("Failed"));
    assert_eq!(stored.retry_status, Some(1));
    assert!(h.uploader.keys().is_empty());

    // Eligible again until the retry cap is reached
    assert!(matches!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Failed { id: 2, .. }
    ));
    assert_eq!(h.work.get(2).unwrap().retry_status, Some(2));
}

#[tokio::test]
async fn test_retry_cap_stops_selection() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 500, Vec::new()).await;

    let h = HarnessBuilder::new().yaml("queue:\n  max_retry: 2\n").build().await;
    h.work.insert(row(4, format!("{}/media/pic.png", server.uri())));

    for _ in 0..2 {
        assert!(matches!(
            run_once(&h.ctx).await.unwrap(),
            RunOutcome::Failed { .. }
        ));
    }
    assert_eq!(run_once(&h.ctx).await.unwrap(), RunOutcome::Idle);
    assert_eq!(h.work.get(4).unwrap().retry_status, Some(2));
}

#[tokio::test]
async fn test_undecodable_image_is_retried() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, b"plain text".to_vec()).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(5, format!("{}/media/pic.png", server.uri())));

    assert_eq!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Failed {
            id: 5,
            status: "Failed".to_string()
        }
    );
    assert!(h.uploader.keys().is_empty());
    assert!(files_under(&h.ctx.config.paths.cache_dir).is_empty());
}

#[tokio::test]
async fn test_rejected_credentials_pause_claiming() {
    let server = MockServer::start().await;
    serve(&server, "/media/a.png", 200, png_bytes(640, 480)).await;
    serve(&server, "/media/b.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new()
        .upload_mode(UploadMode::RejectCredentials)
        .build()
        .await;
    h.work.insert(row(1, format!("{}/media/a.png", server.uri())));
    h.work.insert(row(2, format!("{}/media/b.png", server.uri())));

    let outcome = run_once(&h.ctx).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            id: 1,
            status: "Error: Unauthorized upload credentials".to_string()
        }
    );

    assert_eq!(run_once(&h.ctx).await.unwrap(), RunOutcome::Paused);
    let untouched = h.work.get(2).unwrap();
    assert_eq!(untouched.task_status, None);
    assert_eq!(untouched.retry_status, None);
}

#[tokio::test]
async fn test_upload_failure_is_retryable() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().upload_mode(UploadMode::Fail).build().await;
    h.work.insert(row(9, format!("{}/media/pic.png", server.uri())));

    assert_eq!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Failed {
            id: 9,
            status: "Failed".to_string()
        }
    );
    assert!(files_under(&h.ctx.config.paths.cache_dir).is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_claim_once() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(11, format!("{}/media/pic.png", server.uri())));

    let (a, b) = tokio::join!(run_once(&h.ctx), run_once(&h.ctx));
    let outcomes = [a.unwrap(), b.unwrap()];

    let successes = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Succeeded { .. }))
        .count();
    assert_eq!(successes, 1, "{:?}", outcomes);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, RunOutcome::Idle | RunOutcome::Lost(11))));
    assert_eq!(h.uploader.keys().len(), 1);
    assert_eq!(h.work.get(11).unwrap().retry_status, Some(1));
}

#[tokio::test]
async fn test_progress_is_published_and_persisted() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(6, format!("{}/media/pic.png", server.uri())));

    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.ctx.events.on(DOWNLOAD_PROGRESS, 0, move |payload, _| {
        sink.lock().unwrap().push(payload.clone());
        payload
    });

    assert!(matches!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Succeeded { .. }
    ));

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("at least one progress event");
    assert_eq!(last["item_id"], json!(6));
    assert_eq!(last["percent"], json!(100));

    let history = h.work.status_history(6);
    assert_eq!(history.last().map(String::as_str), Some("Downloading 100%"));
}

#[tokio::test]
async fn test_upload_key_can_be_rewritten() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(8, format!("{}/media/pic.png", server.uri())));

    h.ctx.events.on(UPLOAD_KEY, 0, |payload, ctx| {
        let id = ctx.extra.first().cloned().unwrap_or(Value::Null);
        let name = payload
            .as_str()
            .and_then(|key| key.rsplit('/').next())
            .unwrap_or("thumb.jpg")
            .to_string();
        json!(format!("custom/{}/{}", id, name))
    });

    let published: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&published);
    h.ctx.events.on(UPLOAD_SUCCESS, 0, move |payload, _| {
        *sink.lock().unwrap() = Some(payload.clone());
        payload
    });

    let outcome = run_once(&h.ctx).await.unwrap();
    let RunOutcome::Succeeded { cover_image, .. } = outcome else {
        panic!("expected success, got {:?}", outcome);
    };

    let keys = h.uploader.keys();
    assert!(keys[0].starts_with("custom/8/"), "{}", keys[0]);
    assert!(cover_image.ends_with(&keys[0]));

    let published = published.lock().unwrap().clone().unwrap();
    assert_eq!(published["key"], json!(keys[0]));
}

#[tokio::test]
async fn test_blank_key_falls_back_to_default() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(12, format!("{}/media/pic.png", server.uri())));
    h.ctx.events.on(UPLOAD_KEY, 0, |_, _| json!("  "));

    run_once(&h.ctx).await.unwrap();
    assert!(h.uploader.keys()[0].starts_with("content/thumbnails/12/"));
}

#[tokio::test]
async fn test_stale_and_finished_rows_are_skipped() {
    let h = HarnessBuilder::new().build().await;

    let mut stale = WorkItem::new(1, "https://cdn.example.com/a.png", Utc::now() - Duration::days(30));
    stale.task_status = None;
    let mut done = WorkItem::new(2, "https://cdn.example.com/b.png", Utc::now());
    done.cover_image = Some("https://cdn.test/b.jpg".to_string());
    let mut busy = WorkItem::new(3, "https://cdn.example.com/c.png", Utc::now());
    busy.task_status = Some("Processing".to_string());
    let unsupported = WorkItem::new(4, "https://cdn.example.com/d.gif", Utc::now());

    for item in [stale, done, busy, unsupported] {
        h.work.insert(item);
    }

    assert_eq!(run_once(&h.ctx).await.unwrap(), RunOutcome::Idle);
    assert!(h.uploader.keys().is_empty());
}

#[tokio::test]
async fn test_unrecorded_success_releases_the_row() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let rows = Arc::new(MemoryWorkStore::new());
    rows.insert(row(9, format!("{}/media/pic.png", server.uri())));
    let h = HarnessBuilder::new()
        .work_store(Arc::new(CompleteFails(Arc::clone(&rows))))
        .build()
        .await;

    let err = run_once(&h.ctx).await.unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);

    // Not left in progress: the row is a transient failure and can be reclaimed
    let stored = rows.get(9).unwrap();
    assert_eq!(stored.task_status.as_deref(), Some("Failed"));
    assert_eq!(stored.retry_status, Some(1));
    assert!(rows
        .select_next(&h.ctx.config.claim_policy())
        .await
        .unwrap()
        .is_some());
    assert!(files_under(&h.ctx.config.paths.cache_dir).is_empty());
}

#[tokio::test]
async fn test_do_not_retry_row_is_attempted_once() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 502, Vec::new()).await;

    let h = HarnessBuilder::new().build().await;
    let mut item = row(5, format!("{}/media/pic.png", server.uri()));
    item.retry_status = Some(-1);
    h.work.insert(item);

    assert!(matches!(
        run_once(&h.ctx).await.unwrap(),
        RunOutcome::Failed { id: 5, .. }
    ));
    let stored = h.work.get(5).unwrap();
    assert_eq!(stored.task_status.as_deref(), Some("Failed"));
    assert_eq!(stored.retry_status, Some(-1));

    assert_eq!(run_once(&h.ctx).await.unwrap(), RunOutcome::Idle);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_url_with_surrounding_whitespace_is_claimed() {
    let server = MockServer::start().await;
    serve(&server, "/media/pic.png", 200, png_bytes(640, 480)).await;

    let h = HarnessBuilder::new().build().await;
    h.work.insert(row(6, format!("  {}/media/pic.png \n", server.uri())));

    let outcome = run_once(&h.ctx).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Succeeded { id: 6, .. }), "{:?}", outcome);
}
