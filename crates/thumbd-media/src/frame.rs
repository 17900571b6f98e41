//! Representative frames from video sources.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::command::{FfmpegRunner, FrameCommand};
use crate::error::{MediaError, MediaResult};
use crate::probe;

/// Source of still frames for video content.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn probe_frame_count(&self, path: &Path) -> MediaResult<u64>;

    /// Duration in whole seconds.
    async fn probe_duration(&self, path: &Path) -> MediaResult<u64>;

    /// Write the frame at `second` to `out`.
    async fn extract_frame(&self, path: &Path, second: u64, out: &Path) -> MediaResult<()>;

    /// Extract one frame near `second` into `out_dir` and return its path.
    ///
    /// The position is clamped into the video so short clips still yield a
    /// frame.
    async fn representative_frame(
        &self,
        path: &Path,
        second: u64,
        out_dir: &Path,
    ) -> MediaResult<PathBuf> {
        if self.probe_frame_count(path).await? == 0 {
            return Err(MediaError::InvalidVideo(format!(
                "{} has no video frames",
                path.display()
            )));
        }

        let duration = self.probe_duration(path).await?;
        let at = second.min(duration.saturating_sub(1));
        let out = out_dir.join(format!("{}.jpg", Uuid::new_v4()));

        debug!(
            "Extracting frame at {}s (duration {}s) from {}",
            at,
            duration,
            path.display()
        );
        self.extract_frame(path, at, &out).await?;

        if !tokio::fs::try_exists(&out).await.unwrap_or(false) {
            return Err(MediaError::ffmpeg_failed("no frame was written", None, None));
        }
        Ok(out)
    }
}

const FRAME_TIMEOUT: Duration = Duration::from_secs(120);

/// [`FrameSource`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegFrameExtractor {
    runner: FfmpegRunner,
    ffprobe: PathBuf,
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"))
    }
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            runner: FfmpegRunner::new(ffmpeg).with_timeout(FRAME_TIMEOUT),
            ffprobe: ffprobe.into(),
        }
    }

    /// Resolve both binaries from PATH.
    pub fn from_path() -> MediaResult<Self> {
        let ffmpeg = crate::command::check_ffmpeg()?;
        let ffprobe = crate::command::check_ffprobe()?;
        Ok(Self::new(ffmpeg, ffprobe))
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameExtractor {
    async fn probe_frame_count(&self, path: &Path) -> MediaResult<u64> {
        probe::probe_frame_count(&self.ffprobe, path).await
    }

    async fn probe_duration(&self, path: &Path) -> MediaResult<u64> {
        probe::probe_duration(&self.ffprobe, path).await
    }

    async fn extract_frame(&self, path: &Path, second: u64, out: &Path) -> MediaResult<()> {
        self.runner.run(&FrameCommand::new(path, out, second)).await
    }
}
