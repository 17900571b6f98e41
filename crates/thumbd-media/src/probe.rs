//! FFprobe queries.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_safe_path;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    nb_read_packets: Option<String>,
}

/// Duration of a media file in whole seconds.
pub async fn probe_duration(ffprobe: &Path, path: &Path) -> MediaResult<u64> {
    let stdout = run_ffprobe(
        ffprobe,
        &["-v", "error", "-show_entries", "format=duration", "-of", "json"],
        path,
    )
    .await?;
    parse_duration(&stdout)
}

/// Number of frames (packets) in the first video stream.
pub async fn probe_frame_count(ffprobe: &Path, path: &Path) -> MediaResult<u64> {
    let stdout = run_ffprobe(
        ffprobe,
        &[
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=nb_read_packets",
            "-of",
            "json",
        ],
        path,
    )
    .await?;
    parse_frame_count(&stdout)
}

async fn run_ffprobe(ffprobe: &Path, args: &[&str], path: &Path) -> MediaResult<Vec<u8>> {
    ensure_safe_path(path)?;

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(ffprobe)
        .args(args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FfprobeNotFound,
            _ => MediaError::Io(e),
        })?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    Ok(output.stdout)
}

fn parse_duration(stdout: &[u8]) -> MediaResult<u64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    let seconds = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| MediaError::InvalidVideo("No duration reported".to_string()))?;
    Ok(seconds.floor() as u64)
}

fn parse_frame_count(stdout: &[u8]) -> MediaResult<u64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    probe
        .streams
        .first()
        .and_then(|s| s.nb_read_packets.as_deref())
        .and_then(|n| n.trim().parse::<u64>().ok())
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))
}
