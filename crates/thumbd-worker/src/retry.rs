//! Consecutive failure tracking for the worker loop.

use tracing::{debug, warn};

/// Circuit breaker over repeated loop iterations.
///
/// Counts consecutive failures; a success resets the count. Once the
/// count reaches `threshold` the breaker is open and the loop gives up.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive_failures: u32,
    threshold: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a successful iteration (resets the count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Loop recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record a failed iteration.
    ///
    /// Returns `true` when the breaker has just opened.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.is_open() {
            warn!(
                "{} consecutive failures, threshold {} reached",
                self.consecutive_failures, self.threshold
            );
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
