//! OS process records.

use serde::{Deserialize, Serialize};

/// One row of the OS process table.
///
/// Rebuilt on every listing and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub tty: String,
    /// Scheduler state as reported by `ps`
    pub status: String,
    /// Accumulated CPU time
    pub time: String,
    pub command: String,
    /// True when `pid` is the caller's own pid
    pub is_current: bool,
}

impl ProcessRecord {
    /// Whether the OS reports the process as a zombie.
    pub fn is_zombie(&self) -> bool {
        self.status.starts_with('Z')
    }
}
