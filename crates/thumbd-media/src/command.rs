//! ffmpeg invocation for still frames.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_safe_path;

/// JPEG quality scale of ffmpeg's mjpeg encoder, 2 is near lossless.
const FRAME_QSCALE: u8 = 2;

/// Grab one frame of `input` at a whole second into `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCommand {
    input: PathBuf,
    output: PathBuf,
    at_second: u64,
    qscale: u8,
}

impl FrameCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>, at_second: u64) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            at_second,
            qscale: FRAME_QSCALE,
        }
    }

    /// mjpeg quality scale, clamped to ffmpeg's 2..=31.
    pub fn qscale(mut self, qscale: u8) -> Self {
        self.qscale = qscale.clamp(2, 31);
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Arguments after the program name. Seeking happens before `-i` so
    /// ffmpeg jumps to the nearest keyframe instead of decoding up to it.
    pub fn args(&self) -> Vec<String> {
        vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-ss".into(),
            self.at_second.to_string(),
            "-i".into(),
            self.input.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-q:v".into(),
            self.qscale.to_string(),
            self.output.to_string_lossy().into_owned(),
        ]
    }
}

/// Runs [`FrameCommand`]s under a wall-clock limit.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, cmd: &FrameCommand) -> MediaResult<()> {
        ensure_safe_path(cmd.input())?;
        ensure_safe_path(cmd.output())?;

        let args = cmd.args();
        debug!("{} {}", self.binary.display(), args.join(" "));

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
                _ => MediaError::Io(e),
            })?;

        // kill_on_drop reaps the child when the timeout drops the future
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(
                    input = %cmd.input().display(),
                    "ffmpeg exceeded {}s",
                    self.timeout.as_secs()
                );
                MediaError::Timeout(self.timeout.as_secs())
            })??;

        if output.status.success() {
            return Ok(());
        }
        Err(MediaError::ffmpeg_failed(
            format!("frame extraction at {}s failed", cmd.at_second),
            Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            output.status.code(),
        ))
    }
}

/// Path of `ffmpeg` on `PATH`.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Path of `ffprobe` on `PATH`.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_precedes_input() {
        let args = FrameCommand::new("input.mp4", "frame.jpg", 3).args();

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "3");
        assert_eq!(args.last().map(String::as_str), Some("frame.jpg"));
    }

    #[test]
    fn test_qscale_is_clamped() {
        let args = FrameCommand::new("a.mp4", "b.jpg", 0).qscale(90).args();
        let q = args.iter().position(|a| a == "-q:v").unwrap();
        assert_eq!(args[q + 1], "31");
    }

    #[tokio::test]
    async fn test_runner_rejects_newline_in_paths() {
        let cmd = FrameCommand::new("in\n.mp4", "out.jpg", 1);
        let err = FfmpegRunner::default().run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::SecurityViolation(_)));
    }
}
