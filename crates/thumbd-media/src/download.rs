//! Streaming HTTP downloads.
//!
//! [`HttpDownload`] is pull-based: the caller drives it chunk by chunk and
//! gets a [`DownloadProgress`] after every write, so progress can be
//! reported (and persisted) between chunks without callbacks.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::ensure_safe_path;
use crate::progress::DownloadProgress;

/// Largest image accepted from a content URL.
pub const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Largest video accepted from a content URL.
pub const MAX_VIDEO_BYTES: u64 = 4 * 1024 * 1024 * 1024;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Build the HTTP client used for content downloads.
pub fn build_http_client() -> MediaResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(600))
        .build()?;
    Ok(client)
}

/// An in-flight download into a local file.
#[derive(Debug)]
pub struct HttpDownload {
    response: reqwest::Response,
    file: File,
    path: PathBuf,
    downloaded: u64,
    total: Option<u64>,
    limit: u64,
    finished: bool,
}

impl HttpDownload {
    /// Send the request and open `dest` for writing.
    ///
    /// Fails on non-success statuses and on a declared length above `limit`.
    pub async fn start(
        client: &reqwest::Client,
        url: &str,
        dest: impl AsRef<Path>,
        limit: u64,
    ) -> MediaResult<Self> {
        let dest = dest.as_ref();
        ensure_safe_path(dest)?;

        debug!("Downloading {} to {}", url, dest.display());
        let response = client.get(url.trim()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        let total = response.content_length();
        if total.is_some_and(|t| t > limit) {
            return Err(MediaError::DownloadTooLarge { limit });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(dest).await?;

        Ok(Self {
            response,
            file,
            path: dest.to_path_buf(),
            downloaded: 0,
            total,
            limit,
            finished: false,
        })
    }

    /// Receive and write the next chunk.
    ///
    /// Returns `Ok(None)` once the final (complete) progress has been handed out.
    pub async fn advance(&mut self) -> MediaResult<Option<DownloadProgress>> {
        if self.finished {
            return Ok(None);
        }

        match self.response.chunk().await? {
            Some(chunk) => {
                self.downloaded += chunk.len() as u64;
                if self.downloaded > self.limit {
                    return Err(MediaError::DownloadTooLarge { limit: self.limit });
                }
                self.file.write_all(&chunk).await?;
                Ok(Some(self.progress()))
            }
            None => {
                self.file.flush().await?;
                self.finished = true;
                if self.downloaded == 0 {
                    return Err(MediaError::download_failed("empty response body"));
                }
                info!("Downloaded {} bytes to {}", self.downloaded, self.path.display());
                Ok(Some(self.progress()))
            }
        }
    }

    /// Drive the download to completion, calling `on_progress` after each chunk.
    pub async fn run<F>(mut self, mut on_progress: F) -> MediaResult<PathBuf>
    where
        F: FnMut(&DownloadProgress),
    {
        while let Some(progress) = self.advance().await? {
            on_progress(&progress);
        }
        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            downloaded: self.downloaded,
            total: self.total,
            is_complete: self.finished,
        }
    }
}
