//! Download progress tracking.

use serde::{Deserialize, Serialize};

/// Progress of a streaming download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Bytes written so far
    pub downloaded: u64,
    /// Content length when the server reported one
    pub total: Option<u64>,
    /// Whether the body has been fully received
    pub is_complete: bool,
}

impl DownloadProgress {
    /// Percentage in 0..=100, `None` while the total is unknown.
    ///
    /// A completed download always reports 100.
    pub fn percent(&self) -> Option<u8> {
        if self.is_complete {
            return Some(100);
        }
        let total = self.total.filter(|t| *t > 0)?;
        let pct = (self.downloaded.saturating_mul(100) / total).min(100);
        Some(pct as u8)
    }
}

/// Bytes between reports when the server sent no length.
pub const UNKNOWN_TOTAL_STEP: u64 = 1024 * 1024;

/// Decides which progress updates are worth persisting.
///
/// Reports once per `step` percent bucket, plus the final update. Without
/// a known total it reports once per [`UNKNOWN_TOTAL_STEP`] bytes instead.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    step: u8,
    byte_step: u64,
    last_bucket: Option<u64>,
}

impl ProgressThrottle {
    pub fn new(step: u8) -> Self {
        Self {
            step: step.clamp(1, 100),
            byte_step: UNKNOWN_TOTAL_STEP,
            last_bucket: None,
        }
    }

    pub fn with_byte_step(mut self, bytes: u64) -> Self {
        self.byte_step = bytes.max(1);
        self
    }

    pub fn should_report(&mut self, progress: &DownloadProgress) -> bool {
        if progress.is_complete {
            return true;
        }
        let bucket = match progress.percent() {
            Some(pct) => u64::from(pct / self.step),
            None => progress.downloaded / self.byte_step,
        };
        if self.last_bucket == Some(bucket) {
            return false;
        }
        self.last_bucket = Some(bucket);
        true
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(10)
    }
}
