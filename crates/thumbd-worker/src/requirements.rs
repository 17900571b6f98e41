//! Startup preconditions.
//!
//! Each check fails with [`WorkerError::PreconditionFailed`], which the
//! binary reports with the fatal banner and exit code 255.

use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// External programs the worker shells out to.
pub const REQUIRED_BINARIES: &[&str] = &["ps", "kill", "nohup", "sh", "ffmpeg", "ffprobe"];

/// Refuse root and sudo sessions.
pub fn check_user() -> WorkerResult<()> {
    check_user_with(
        nix::unistd::geteuid().is_root(),
        std::env::var_os("SUDO_USER").is_some() || std::env::var_os("SUDO_UID").is_some(),
    )
}

fn check_user_with(is_root: bool, under_sudo: bool) -> WorkerResult<()> {
    if is_root {
        return Err(WorkerError::precondition_failed(
            "thumbd must not run as root",
        ));
    }
    if under_sudo {
        return Err(WorkerError::precondition_failed(
            "thumbd must not run under sudo",
        ));
    }
    Ok(())
}

/// Resolve every required binary on `PATH`.
pub fn check_binaries() -> WorkerResult<()> {
    let missing = missing_binaries(REQUIRED_BINARIES);
    if missing.is_empty() {
        return Ok(());
    }
    Err(WorkerError::precondition_failed(format!(
        "required programs not found in PATH: {}",
        missing.join(", ")
    )))
}

/// Names in `names` that `which` cannot resolve.
pub fn missing_binaries(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| match which::which(name) {
            Ok(path) => {
                debug!("Found {} at {}", name, path.display());
                false
            }
            Err(_) => true,
        })
        .map(|name| name.to_string())
        .collect()
}

/// Create the pid directory if needed and make sure it is writable.
pub fn check_pid_dir(dir: &Path) -> WorkerResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        WorkerError::precondition_failed(format!(
            "cannot create pid directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    access(dir, AccessFlags::W_OK | AccessFlags::X_OK).map_err(|e| {
        WorkerError::precondition_failed(format!(
            "pid directory {} is not writable: {}",
            dir.display(),
            e
        ))
    })?;
    Ok(())
}

/// All preconditions for commands that start or run workers.
pub fn check_all(pid_dir: &Path) -> WorkerResult<()> {
    check_user()?;
    check_binaries()?;
    check_pid_dir(pid_dir)
}

/// `<pid>.pid` marker of a running worker, removed explicitly at shutdown.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub async fn create(dir: &Path, pid: u32) -> WorkerResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.pid", pid));
        tokio::fs::write(&path, pid.to_string()).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
