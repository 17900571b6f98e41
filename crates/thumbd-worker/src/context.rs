//! Shared runtime context.

use std::sync::Arc;

use thumbd_media::{build_http_client, FfmpegFrameExtractor, FrameSource, ThumbnailGenerator};
use thumbd_queue::{MetaStore, PgWorkStore, SqliteMetaStore, WorkStore};
use thumbd_storage::{ObjectUploader, S3Uploader};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::WorkerResult;
use crate::events::EventBus;
use crate::process_table::{ProcessTable, PsProcessTable};
use crate::supervisor::{self, Supervisor};

/// Everything a worker process needs, built once at startup and passed
/// by reference to the supervisor, the pipeline and maintenance.
pub struct AppContext {
    pub config: AppConfig,
    pub events: Arc<EventBus>,
    pub work: Arc<dyn WorkStore>,
    pub meta: Arc<dyn MetaStore>,
    pub uploader: Arc<dyn ObjectUploader>,
    pub frames: Arc<dyn FrameSource>,
    pub processes: Arc<dyn ProcessTable>,
    pub http: reqwest::Client,
    pub thumbnails: ThumbnailGenerator,
}

impl AppContext {
    /// Assemble a context from explicit collaborators.
    pub fn new(
        config: AppConfig,
        work: Arc<dyn WorkStore>,
        meta: Arc<dyn MetaStore>,
        uploader: Arc<dyn ObjectUploader>,
        frames: Arc<dyn FrameSource>,
        processes: Arc<dyn ProcessTable>,
    ) -> WorkerResult<Self> {
        let thumbnails = ThumbnailGenerator::new(config.screen_shot.width, config.screen_shot.height)
            .with_quality(config.screen_shot.quality);

        Ok(Self {
            config,
            events: Arc::new(EventBus::new()),
            work,
            meta,
            uploader,
            frames,
            processes,
            http: build_http_client()?,
            thumbnails,
        })
    }

    /// Production context: Postgres, SQLite, S3, ffmpeg and `ps`.
    ///
    /// Upload credentials are validated here; the databases are not
    /// contacted until first use, except the meta database which is
    /// bootstrapped immediately.
    pub async fn connect(config: AppConfig) -> WorkerResult<Self> {
        let work = PgWorkStore::new(config.database.clone())?;
        let meta = SqliteMetaStore::open(&config.paths.meta_db).await?;
        let uploader = S3Uploader::new(config.aws.clone())?;
        let frames = FfmpegFrameExtractor::from_path()?;
        let processes = PsProcessTable::for_current_process(config.source.clone())?;

        debug!(
            database = %config.database.database,
            bucket = %config.aws.bucket,
            meta_db = %config.paths.meta_db.display(),
            "Runtime context ready"
        );

        Self::new(
            config,
            Arc::new(work),
            Arc::new(meta),
            Arc::new(uploader),
            Arc::new(frames),
            Arc::new(processes),
        )
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(
            Arc::clone(&self.processes),
            self.config.paths.stop_file.clone(),
            self.config.daemon.processes,
        )
    }

    /// Work table schema and meta database checks that gate every
    /// spawn or kill decision.
    pub async fn preflight(&self) -> WorkerResult<()> {
        supervisor::preflight(
            self.work.as_ref(),
            self.meta.as_ref(),
            &self.config.database.table,
        )
        .await
    }

    /// Create the cache directories used by the pipeline.
    pub async fn ensure_cache_dirs(&self) -> WorkerResult<()> {
        for dir in self.config.paths.cache_dirs() {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Close pools and drop cached clients; everything reconnects lazily.
    pub async fn close(&self) {
        self.work.reset().await;
        self.meta.reset().await;
        self.uploader.reset().await;
    }
}
