//! Process pool reconciliation.
//!
//! The supervisor compares the number of live sibling processes with the
//! configured target and spawns or kills to converge. It never counts or
//! kills its own pid, and does nothing while the stop file exists or the
//! process table cannot be read.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thumbd_models::{ProcessRecord, WORK_TABLE_COLUMNS};
use thumbd_queue::{MetaStore, QueueError, WorkStore};
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::process_table::ProcessTable;

/// Pool state relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileState {
    /// Process table unavailable
    Unknown,
    /// Stop file present
    Stopped,
    Insufficient,
    Exact,
    Excess,
}

impl ReconcileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileState::Unknown => "Unknown",
            ReconcileState::Stopped => "Stopped",
            ReconcileState::Insufficient => "Insufficient",
            ReconcileState::Exact => "Exact",
            ReconcileState::Excess => "Excess",
        }
    }
}

impl std::fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is reconciling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// A CLI invocation outside the pool
    External,
    /// A worker inside the pool; it occupies one slot itself
    Member,
}

/// A snapshot of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub state: ReconcileState,
    /// Live siblings, excluding the caller and zombies
    pub live: Vec<ProcessRecord>,
    /// Slots the siblings should fill
    pub target: usize,
}

impl Observation {
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// What a reconcile pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unknown,
    Stopped,
    Exact,
    Spawned(usize),
    Killed { killed: Vec<u32>, hung: Vec<u32> },
}

/// Result of terminating the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub stopped: Vec<u32>,
    /// Pids still present after the kill
    pub hung: Vec<u32>,
}

/// Which pids to kill to shed `surplus` processes: lowest pids first.
pub fn select_surplus(live: &[ProcessRecord], surplus: usize) -> Vec<u32> {
    let mut pids: Vec<u32> = live.iter().filter(|r| !r.is_current).map(|r| r.pid).collect();
    pids.sort_unstable();
    pids.truncate(surplus);
    pids
}

/// Keeps the pool at its target size.
pub struct Supervisor {
    processes: Arc<dyn ProcessTable>,
    stop_file: PathBuf,
    target: usize,
    settle: Duration,
}

impl Supervisor {
    pub fn new(processes: Arc<dyn ProcessTable>, stop_file: PathBuf, target: usize) -> Self {
        Self {
            processes,
            stop_file,
            target,
            settle: Duration::from_millis(500),
        }
    }

    /// Delay between a kill and the re-listing that detects survivors.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_file.exists()
    }

    /// Classify the pool without acting on it.
    pub async fn observe(&self, scope: Scope) -> Observation {
        let target = match scope {
            Scope::External => self.target,
            Scope::Member => self.target.saturating_sub(1),
        };

        let Some(records) = self.processes.list().await else {
            return Observation {
                state: ReconcileState::Unknown,
                live: Vec::new(),
                target,
            };
        };

        let live: Vec<ProcessRecord> = records
            .into_iter()
            .filter(|r| !r.is_current && !r.is_zombie())
            .collect();

        let state = if self.is_stopped() {
            ReconcileState::Stopped
        } else {
            match live.len().cmp(&target) {
                std::cmp::Ordering::Less => ReconcileState::Insufficient,
                std::cmp::Ordering::Equal => ReconcileState::Exact,
                std::cmp::Ordering::Greater => ReconcileState::Excess,
            }
        };

        Observation {
            state,
            live,
            target,
        }
    }

    /// Spawn or kill until the observed count matches the target.
    pub async fn reconcile(&self, scope: Scope) -> WorkerResult<ReconcileOutcome> {
        let observation = self.observe(scope).await;
        let live = observation.live_count();

        match observation.state {
            ReconcileState::Unknown => {
                warn!("Process table unavailable, skipping reconcile");
                Ok(ReconcileOutcome::Unknown)
            }
            ReconcileState::Stopped => {
                info!(
                    stop_file = %self.stop_file.display(),
                    "Stop file present, not starting or killing processes"
                );
                Ok(ReconcileOutcome::Stopped)
            }
            ReconcileState::Exact => Ok(ReconcileOutcome::Exact),
            ReconcileState::Insufficient => {
                let missing = observation.target - live;
                info!(live, target = observation.target, "Spawning {} worker(s)", missing);
                let spawned = self.processes.spawn_detached(missing).await?;
                counter!("thumbd_processes_spawned_total").increment(spawned as u64);
                Ok(ReconcileOutcome::Spawned(spawned))
            }
            ReconcileState::Excess => {
                let victims = select_surplus(&observation.live, live - observation.target);
                info!(live, target = observation.target, pids = ?victims, "Killing surplus workers");
                let hung = self.kill_and_verify(&victims).await?;
                counter!("thumbd_processes_killed_total")
                    .increment((victims.len() - hung.len()) as u64);
                Ok(ReconcileOutcome::Killed {
                    killed: victims,
                    hung,
                })
            }
        }
    }

    /// Kill every sibling process.
    pub async fn stop(&self) -> WorkerResult<StopReport> {
        let records = self
            .processes
            .list()
            .await
            .ok_or_else(|| WorkerError::process_table("process table unavailable"))?;

        let pids: Vec<u32> = records
            .iter()
            .filter(|r| !r.is_current)
            .map(|r| r.pid)
            .collect();
        if pids.is_empty() {
            return Ok(StopReport::default());
        }

        let hung = self.kill_and_verify(&pids).await?;
        let stopped: Vec<u32> = pids.into_iter().filter(|p| !hung.contains(p)).collect();
        counter!("thumbd_processes_killed_total").increment(stopped.len() as u64);

        if !hung.is_empty() {
            warn!(pids = ?hung, "Processes survived SIGKILL");
        }
        Ok(StopReport { stopped, hung })
    }

    /// Kill `pids`, then report the ones still listed.
    async fn kill_and_verify(&self, pids: &[u32]) -> WorkerResult<Vec<u32>> {
        self.processes.kill(pids).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let Some(after) = self.processes.list().await else {
            // Nothing to compare against, assume the kill landed
            return Ok(Vec::new());
        };
        let remaining: HashSet<u32> = after
            .iter()
            .filter(|r| !r.is_zombie())
            .map(|r| r.pid)
            .collect();
        Ok(pids.iter().copied().filter(|p| remaining.contains(p)).collect())
    }
}

/// Verify the stores before any process is started.
pub async fn preflight(work: &dyn WorkStore, meta: &dyn MetaStore, table: &str) -> WorkerResult<()> {
    if !work.table_exists().await? {
        return Err(QueueError::schema_missing(table).into());
    }

    let missing = work.missing_columns(WORK_TABLE_COLUMNS).await?;
    if !missing.is_empty() {
        return Err(QueueError::ColumnsMissing {
            table: table.to_string(),
            columns: missing,
        }
        .into());
    }

    meta.ping().await.map_err(|e| {
        WorkerError::precondition_failed(format!("meta database is not responding: {}", e))
    })?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeProcessTable;
    use super::*;
    use thumbd_queue::{MemoryMetaStore, MemoryWorkStore};

    fn supervisor(table: Arc<FakeProcessTable>, stop_file: PathBuf, target: usize) -> Supervisor {
        Supervisor::new(table, stop_file, target).with_settle(Duration::ZERO)
    }

    fn no_stop_file() -> PathBuf {
        PathBuf::from("/nonexistent/thumbd/.stop")
    }

    #[tokio::test]
    async fn test_spawns_up_to_target() {
        let table = Arc::new(FakeProcessTable::new(&[100, 101, 500], Some(500)));
        let sup = supervisor(table.clone(), no_stop_file(), 5);

        assert_eq!(sup.observe(Scope::External).await.state, ReconcileState::Insufficient);
        assert_eq!(sup.reconcile(Scope::External).await.unwrap(), ReconcileOutcome::Spawned(3));

        let after = sup.observe(Scope::External).await;
        assert_eq!(after.state, ReconcileState::Exact);
        assert_eq!(after.live_count(), 5);
    }

    #[tokio::test]
    async fn test_kills_lowest_surplus_never_self() {
        let table = Arc::new(FakeProcessTable::new(&[1, 200, 300, 400], Some(1)));
        let sup = supervisor(table.clone(), no_stop_file(), 2);

        let outcome = sup.reconcile(Scope::External).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Killed {
                killed: vec![200],
                hung: vec![]
            }
        );
        assert_eq!(table.kills.lock().unwrap().len(), 1);
        assert!(table.pids().contains(&1));
        assert_eq!(sup.observe(Scope::External).await.state, ReconcileState::Exact);
    }

    #[tokio::test]
    async fn test_member_scope_counts_itself() {
        // Pool of 3: this worker plus two siblings
        let table = Arc::new(FakeProcessTable::new(&[10, 11, 12], Some(12)));
        let sup = supervisor(table, no_stop_file(), 3);

        assert_eq!(sup.observe(Scope::Member).await.state, ReconcileState::Exact);
        assert_eq!(sup.observe(Scope::External).await.state, ReconcileState::Insufficient);
    }

    #[tokio::test]
    async fn test_stop_file_blocks_spawning() {
        let dir = tempfile::TempDir::new().unwrap();
        let stop_file = dir.path().join(".stop");
        std::fs::write(&stop_file, b"").unwrap();

        let table = Arc::new(FakeProcessTable::new(&[], None));
        let sup = supervisor(table.clone(), stop_file, 4);

        assert_eq!(sup.reconcile(Scope::External).await.unwrap(), ReconcileOutcome::Stopped);
        assert!(table.pids().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_table_takes_no_action() {
        let table = Arc::new(FakeProcessTable::unavailable());
        let sup = supervisor(table.clone(), no_stop_file(), 4);

        assert_eq!(sup.observe(Scope::External).await.state, ReconcileState::Unknown);
        assert_eq!(sup.reconcile(Scope::External).await.unwrap(), ReconcileOutcome::Unknown);
        assert!(table.kills.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zombies_are_not_live() {
        let table = Arc::new(FakeProcessTable::new(&[5, 6], None));
        table.records.lock().unwrap().as_mut().unwrap()[0].status = "Z".to_string();
        let sup = supervisor(table, no_stop_file(), 1);

        assert_eq!(sup.observe(Scope::External).await.state, ReconcileState::Exact);
    }

    #[tokio::test]
    async fn test_stop_reports_hung() {
        let mut fake = FakeProcessTable::new(&[7, 8, 9, 99], Some(99));
        fake.stubborn = vec![8];
        let table = Arc::new(fake);
        let sup = supervisor(table.clone(), no_stop_file(), 3);

        let report = sup.stop().await.unwrap();
        assert_eq!(report.stopped, vec![7, 9]);
        assert_eq!(report.hung, vec![8]);
        assert_eq!(table.pids(), vec![8, 99]);
    }

    #[test]
    fn test_select_surplus() {
        let live = vec![
            testing::record(30, false),
            testing::record(10, false),
            testing::record(5, true),
            testing::record(20, false),
        ];
        assert_eq!(select_surplus(&live, 2), vec![10, 20]);
        assert!(select_surplus(&live, 0).is_empty());
    }

    #[tokio::test]
    async fn test_preflight() {
        let work = MemoryWorkStore::new();
        let meta = MemoryMetaStore::new();
        preflight(&work, &meta, "contents").await.unwrap();

        meta.set_unavailable(true);
        let err = preflight(&work, &meta, "contents").await.unwrap_err();
        assert!(err.is_fatal());
        meta.set_unavailable(false);

        work.set_columns(vec!["id".to_string()]);
        let err = preflight(&work, &meta, "contents").await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("coverImage"));
    }
}
