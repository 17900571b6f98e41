//! The `application:start` loop.
//!
//! Each iteration checks the stop file, periodically reconciles the pool
//! and resets resources, then processes at most one row and sleeps.
//! Non-fatal iteration errors feed a [`FailureTracker`]; once it opens
//! the loop returns [`WorkerError::CircuitOpen`].

use chrono::Utc;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::{WorkerError, WorkerResult};
use crate::maintenance;
use crate::pipeline::{self, RunOutcome};
use crate::requirements::PidFile;
use crate::retry::FailureTracker;
use crate::supervisor::{Scope, Supervisor};

/// Whether the loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// Drives one worker process.
pub struct Runner<'a> {
    ctx: &'a AppContext,
    supervisor: Supervisor,
    failures: FailureTracker,
    iteration: u64,
}

impl<'a> Runner<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self {
            ctx,
            supervisor: ctx.supervisor(),
            failures: FailureTracker::new(ctx.config.daemon.max_consecutive_failures),
            iteration: 0,
        }
    }

    /// Replace the supervisor, e.g. to tune its settle delay.
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Run one iteration without sleeping.
    pub async fn tick(&mut self) -> WorkerResult<Step> {
        if self.supervisor.is_stopped() {
            info!(
                stop_file = %self.ctx.config.paths.stop_file.display(),
                "Stop file present, leaving the loop"
            );
            return Ok(Step::Stop);
        }

        self.iteration += 1;
        match self.iterate().await {
            Ok(outcome) => {
                self.failures.record_success();
                if let RunOutcome::Failed { id, status } = &outcome {
                    info!(item_id = id, status = %status, "Row resolved with failure");
                }
                Ok(Step::Continue)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    iteration = self.iteration,
                    failures = self.failures.failure_count() + 1,
                    "Loop iteration failed: {}",
                    e
                );
                if self.failures.record_failure() {
                    return Err(WorkerError::CircuitOpen(self.failures.failure_count()));
                }
                Ok(Step::Continue)
            }
        }
    }

    async fn iterate(&mut self) -> WorkerResult<RunOutcome> {
        let daemon = &self.ctx.config.daemon;

        if self.iteration % daemon.check_every == 0 {
            self.ctx.preflight().await?;
            self.supervisor.reconcile(Scope::Member).await?;
        }

        if self.iteration % daemon.collect_cycle_loop == 0 {
            maintenance::maybe_run(self.ctx, Utc::now()).await?;
            maintenance::reset_resources(self.ctx).await;
        }

        pipeline::run_once(self.ctx).await
    }

    /// Loop until the stop file appears, a shutdown signal arrives or the
    /// circuit breaker opens. Always runs the shutdown steps.
    pub async fn run(mut self) -> WorkerResult<()> {
        let pid = std::process::id();
        let pid_file = PidFile::create(&self.ctx.config.paths.pid_dir, pid).await?;
        info!(pid, "Worker loop started");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let result = loop {
            match self.tick().await {
                Ok(Step::Stop) => break Ok(()),
                Ok(Step::Continue) => {}
                Err(e) => break Err(e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.config.daemon.wait) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.shutdown(pid_file).await;
        result
    }

    async fn shutdown(&self, pid_file: PidFile) {
        if let Err(e) = maintenance::maybe_run(self.ctx, Utc::now()).await {
            error!("Maintenance at shutdown failed: {}", e);
        }
        self.ctx.close().await;
        pid_file.remove().await;
        info!(iterations = self.iteration, "Worker loop stopped");
    }
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Completes on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    ctrl_c().await;
}
