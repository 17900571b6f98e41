//! OS process table access.
//!
//! [`PsProcessTable`] shells out to `ps`, `sh`/`nohup` and `kill`. Every
//! path spliced into a shell string is single-quoted and checked for
//! control characters first.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use thumbd_media::fs_utils::ensure_safe_path;
use thumbd_models::ProcessRecord;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

/// Subcommand children are started with.
pub const WORKER_SUBCOMMAND: &str = "application:start";

/// Process listing, spawning and termination.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// Sibling processes of this binary owned by the current user.
    ///
    /// `None` when the listing could not be obtained, which callers must
    /// not confuse with an empty table.
    async fn list(&self) -> Option<Vec<ProcessRecord>>;

    /// Start `count` detached worker processes without waiting for them.
    async fn spawn_detached(&self, count: usize) -> WorkerResult<usize>;

    /// Send SIGKILL to `pids` in a single invocation.
    ///
    /// Partial failure is not an error; callers re-list to find survivors.
    async fn kill(&self, pids: &[u32]) -> WorkerResult<()>;
}

fn ps_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(.+)$").ok())
        .as_ref()
}

/// Parse `ps -o pid=,tty=,stat=,time=,args=` output.
///
/// Keeps rows whose program basename equals `binary_name` and flags the
/// row of `own_pid`. Malformed lines are dropped. Rows come back sorted by pid.
pub fn parse_ps_output(output: &str, binary_name: &str, own_pid: u32) -> Vec<ProcessRecord> {
    let Some(re) = ps_line_regex() else {
        return Vec::new();
    };

    let mut records: Vec<ProcessRecord> = output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let pid = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let command = caps.get(5)?.as_str().trim().to_string();
            let program = command.split_whitespace().next()?;
            let basename = Path::new(program).file_name()?.to_str()?;
            if basename != binary_name {
                return None;
            }
            Some(ProcessRecord {
                pid,
                tty: caps.get(2)?.as_str().to_string(),
                status: caps.get(3)?.as_str().to_string(),
                time: caps.get(4)?.as_str().to_string(),
                command,
                is_current: pid == own_pid,
            })
        })
        .collect();
    records.sort_by_key(|r| r.pid);
    records
}

/// Single-quote `value` for `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell line that starts one detached worker.
pub fn spawn_script(workdir: &Path, exe: &Path, config: Option<&Path>) -> WorkerResult<String> {
    let mut parts = vec![
        "nohup".to_string(),
        quoted_path(exe)?,
    ];
    if let Some(config) = config {
        parts.push("--config".to_string());
        parts.push(quoted_path(config)?);
    }
    parts.push(WORKER_SUBCOMMAND.to_string());

    Ok(format!(
        "cd {} && {} >/dev/null 2>&1 &",
        quoted_path(workdir)?,
        parts.join(" ")
    ))
}

fn quoted_path(path: &Path) -> WorkerResult<String> {
    ensure_safe_path(path)?;
    let value = path
        .to_str()
        .ok_or_else(|| WorkerError::process_table(format!("non UTF-8 path {}", path.display())))?;
    Ok(shell_quote(value))
}

/// Name of the user owning this process.
pub fn current_user() -> Option<String> {
    let uid = nix::unistd::geteuid();
    nix::unistd::User::from_uid(uid)
        .ok()
        .flatten()
        .map(|user| user.name)
        .or_else(|| std::env::var("USER").ok())
}

/// [`ProcessTable`] over `ps`, `nohup` and `kill`.
#[derive(Debug, Clone)]
pub struct PsProcessTable {
    user: String,
    binary_name: String,
    exe: PathBuf,
    workdir: PathBuf,
    config: Option<PathBuf>,
    own_pid: u32,
}

impl PsProcessTable {
    /// Describe this process: its executable, working directory and user.
    pub fn for_current_process(config: Option<PathBuf>) -> WorkerResult<Self> {
        let exe = std::env::current_exe()?;
        let binary_name = exe
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| WorkerError::process_table("cannot determine binary name"))?;
        let user = current_user()
            .ok_or_else(|| WorkerError::process_table("cannot determine current user"))?;

        Ok(Self {
            user,
            binary_name,
            exe,
            workdir: std::env::current_dir()?,
            config,
            own_pid: std::process::id(),
        })
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }
}

#[async_trait]
impl ProcessTable for PsProcessTable {
    async fn list(&self) -> Option<Vec<ProcessRecord>> {
        let output = Command::new("ps")
            .args(["-U", &self.user, "-w", "-w", "-o", "pid=,tty=,stat=,time=,args="])
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run ps: {}", e);
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            debug!("ps returned no output (status {})", output.status);
            return None;
        }

        Some(parse_ps_output(&stdout, &self.binary_name, self.own_pid))
    }

    async fn spawn_detached(&self, count: usize) -> WorkerResult<usize> {
        let script = spawn_script(&self.workdir, &self.exe, self.config.as_deref())?;
        let mut spawned = 0;

        for _ in 0..count {
            let status = Command::new("sh")
                .arg("-c")
                .arg(&script)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await?;
            if status.success() {
                spawned += 1;
            } else {
                warn!("Spawn shell exited with {}", status);
            }
        }

        debug!("Spawned {} of {} worker processes", spawned, count);
        Ok(spawned)
    }

    async fn kill(&self, pids: &[u32]) -> WorkerResult<()> {
        let pids: Vec<String> = pids
            .iter()
            .filter(|pid| **pid != self.own_pid)
            .map(u32::to_string)
            .collect();
        if pids.is_empty() {
            return Ok(());
        }

        let output = Command::new("kill")
            .arg("-9")
            .args(&pids)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            warn!(
                "kill -9 {} exited with {}: {}",
                pids.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
