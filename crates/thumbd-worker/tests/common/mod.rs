//! Fakes and fixtures shared by the worker integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageOutputFormat, Rgb, RgbImage};
use tempfile::TempDir;

use thumbd_media::{FrameSource, MediaResult};
use thumbd_models::ProcessRecord;
use thumbd_queue::{MemoryMetaStore, MemoryWorkStore, MetaStore, WorkStore};
use thumbd_storage::{ObjectUploader, StorageError, StorageResult, UploadedObject};
use thumbd_worker::process_table::ProcessTable;
use thumbd_worker::{AppConfig, AppContext, WorkerResult};

pub const OWN_PID: u32 = 100;

/// How [`FakeUploader`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Accept,
    Fail,
    RejectCredentials,
}

pub struct FakeUploader {
    mode: UploadMode,
    unauthenticated: AtomicBool,
    keys: Mutex<Vec<String>>,
    resets: AtomicUsize,
}

impl FakeUploader {
    pub fn new(mode: UploadMode) -> Self {
        Self {
            mode,
            unauthenticated: AtomicBool::new(false),
            keys: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectUploader for FakeUploader {
    async fn upload(&self, local: &Path, key: &str) -> StorageResult<UploadedObject> {
        if self.is_unauthenticated() {
            return Err(StorageError::Unauthenticated);
        }
        assert!(local.is_file(), "{} should exist while uploading", local.display());
        self.keys.lock().unwrap().push(key.to_string());

        match self.mode {
            UploadMode::Accept => Ok(UploadedObject {
                key: key.to_string(),
                url: format!("https://cdn.test/{}", key),
            }),
            UploadMode::Fail => Err(StorageError::upload_failed("bucket unreachable")),
            UploadMode::RejectCredentials => {
                self.unauthenticated.store(true, Ordering::SeqCst);
                Err(StorageError::Unauthenticated)
            }
        }
    }

    fn is_unauthenticated(&self) -> bool {
        self.unauthenticated.load(Ordering::SeqCst)
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Frame source that ignores the video and writes a solid JPEG.
pub struct FakeFrames {
    pub duration: u64,
    pub requested: Mutex<Vec<u64>>,
}

impl FakeFrames {
    pub fn new(duration: u64) -> Self {
        Self {
            duration,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn probe_frame_count(&self, _path: &Path) -> MediaResult<u64> {
        Ok(self.duration * 25)
    }

    async fn probe_duration(&self, _path: &Path) -> MediaResult<u64> {
        Ok(self.duration)
    }

    async fn extract_frame(&self, _path: &Path, second: u64, out: &Path) -> MediaResult<()> {
        self.requested.lock().unwrap().push(second);
        RgbImage::from_pixel(1280, 720, Rgb([10, 120, 200])).save(out)?;
        Ok(())
    }
}

/// Process table holding a fixed listing and counting spawns and kills.
pub struct FakeProcesses {
    records: Mutex<Option<Vec<ProcessRecord>>>,
    pub spawned: AtomicUsize,
    pub killed: Mutex<Vec<u32>>,
}

impl FakeProcesses {
    /// A listing holding only the calling process.
    pub fn only_self() -> Self {
        Self::with_pids(&[])
    }

    /// The calling process plus siblings `pids`.
    pub fn with_pids(pids: &[u32]) -> Self {
        let mut records = vec![record(OWN_PID, true)];
        records.extend(pids.iter().map(|&pid| record(pid, false)));
        Self {
            records: Mutex::new(Some(records)),
            spawned: AtomicUsize::new(0),
            killed: Mutex::new(Vec::new()),
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

pub fn record(pid: u32, is_current: bool) -> ProcessRecord {
    ProcessRecord {
        pid,
        tty: "?".to_string(),
        status: "S".to_string(),
        time: "00:00:01".to_string(),
        command: format!("/usr/local/bin/thumbd {}", "application:start"),
        is_current,
    }
}

#[async_trait]
impl ProcessTable for FakeProcesses {
    async fn list(&self) -> Option<Vec<ProcessRecord>> {
        self.records.lock().unwrap().clone()
    }

    async fn spawn_detached(&self, count: usize) -> WorkerResult<usize> {
        self.spawned.fetch_add(count, Ordering::SeqCst);
        Ok(count)
    }

    async fn kill(&self, pids: &[u32]) -> WorkerResult<()> {
        self.killed.lock().unwrap().extend_from_slice(pids);
        if let Some(records) = self.records.lock().unwrap().as_mut() {
            records.retain(|r| !pids.contains(&r.pid));
        }
        Ok(())
    }
}

/// Configuration rooted in `dir`, with `extra` YAML appended.
pub fn config_in(dir: &Path, extra: &str) -> AppConfig {
    let yaml = format!(
        r#"
database:
  dbname: content
  dbuser: worker
aws:
  region: us-east-1
  bucket: thumbs
paths:
  cache_dir: cache
  stop_file: .stop
  pid_dir: pids
  meta_db: meta.db
screen_shot:
  width: 320
  height: 180
  second: 3
{}
"#,
        extra
    );
    AppConfig::from_yaml_str(&yaml, dir).unwrap()
}

/// A context over in-memory stores and fakes.
pub struct Harness {
    pub dir: TempDir,
    pub ctx: AppContext,
    pub work: Arc<MemoryWorkStore>,
    pub meta: Arc<MemoryMetaStore>,
    pub uploader: Arc<FakeUploader>,
    pub frames: Arc<FakeFrames>,
    pub processes: Arc<FakeProcesses>,
}

pub struct HarnessBuilder {
    extra_yaml: String,
    upload_mode: UploadMode,
    processes: FakeProcesses,
    work: Option<Arc<dyn WorkStore>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            extra_yaml: String::new(),
            upload_mode: UploadMode::Accept,
            processes: FakeProcesses::only_self(),
            work: None,
        }
    }

    pub fn yaml(mut self, extra: &str) -> Self {
        self.extra_yaml = extra.to_string();
        self
    }

    pub fn upload_mode(mut self, mode: UploadMode) -> Self {
        self.upload_mode = mode;
        self
    }

    pub fn processes(mut self, processes: FakeProcesses) -> Self {
        self.processes = processes;
        self
    }

    /// Replace the work store handed to the context.
    pub fn work_store(mut self, work: Arc<dyn WorkStore>) -> Self {
        self.work = Some(work);
        self
    }

    pub async fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path(), &self.extra_yaml);

        let work = Arc::new(MemoryWorkStore::new());
        let meta = Arc::new(MemoryMetaStore::new());
        let uploader = Arc::new(FakeUploader::new(self.upload_mode));
        let frames = Arc::new(FakeFrames::new(2));
        let processes = Arc::new(self.processes);

        let work_for_ctx: Arc<dyn WorkStore> = match self.work {
            Some(work) => work,
            None => work.clone() as Arc<dyn WorkStore>,
        };
        let meta_for_ctx: Arc<dyn MetaStore> = meta.clone();

        let ctx = AppContext::new(
            config,
            work_for_ctx,
            meta_for_ctx,
            uploader.clone(),
            frames.clone(),
            processes.clone(),
        )
        .unwrap();
        ctx.ensure_cache_dirs().await.unwrap();

        Harness {
            dir,
            ctx,
            work,
            meta,
            uploader,
            frames,
            processes,
        }
    }
}

/// Encoded PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

/// Every regular file below `dir`.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}
