//! Fleet supervisor
//!
//! Waits for the coordinator to answer, launches the initial workers, then
//! polls the liveness table. A client silent for longer than the dead
//! threshold is reported disconnected (its item goes back to the queue) and
//! replaced by a worker with a fresh id.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Timings, WorkerLauncher};
use crate::coordinator::{ClientId, CoordinatorApi};
use crate::utils::{age, SharedClock};

/// Supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Coordinator unreachable after {waited_secs}s: {last_error}")]
    Unreachable { waited_secs: u64, last_error: String },
}

/// What the supervisor did over one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub launched: usize,
    pub replaced: usize,
    pub reaped: usize,
}

pub struct FleetSupervisor {
    api: Arc<dyn CoordinatorApi>,
    launcher: Arc<dyn WorkerLauncher>,
    clock: SharedClock,
    timings: Timings,
    next_id: ClientId,
    /// Clients already declared dead, by either detector
    retired: HashSet<ClientId>,
    report: SupervisorReport,
}

impl FleetSupervisor {
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        launcher: Arc<dyn WorkerLauncher>,
        clock: SharedClock,
        timings: Timings,
    ) -> Self {
        Self {
            api,
            launcher,
            clock,
            timings,
            next_id: 1,
            retired: HashSet::new(),
            report: SupervisorReport::default(),
        }
    }

    /// Supervise `workers` workers until the coordinator runs out of work and
    /// every client has either left or been reaped.
    pub async fn run(mut self, workers: usize) -> Result<SupervisorReport> {
        self.wait_reachable().await?;

        for _ in 0..workers {
            self.launch()?;
        }
        info!("Started {} workers", workers);

        loop {
            self.clock.sleep(self.timings.poll_interval).await;
            // Collected before the work check: a worker seen exited while
            // work remains cannot have been told to stop.
            let exited = self.launcher.exited();
            if self.api.no_more_work().await? {
                break;
            }
            self.retire(exited, true).await?;
            self.reap(true).await?;
        }

        debug!("No more work, draining connected workers");
        loop {
            if self.api.liveness_snapshot().await?.is_empty() {
                break;
            }
            let exited = self.launcher.exited();
            self.retire(exited, false).await?;
            self.reap(false).await?;
            self.clock.sleep(self.timings.poll_interval).await;
        }

        info!(
            "Fleet finished: {} launched, {} dead, {} replaced",
            self.report.launched, self.report.reaped, self.report.replaced
        );
        Ok(self.report)
    }

    async fn wait_reachable(&self) -> Result<()> {
        let start = self.clock.now();
        loop {
            let err = match self.api.probe().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let waited = age(self.clock.now(), start);
            if waited >= self.timings.probe_timeout {
                return Err(SupervisorError::Unreachable {
                    waited_secs: waited.as_secs(),
                    last_error: err.to_string(),
                }
                .into());
            }
            debug!("Coordinator not reachable yet: {}", err);
            self.clock.sleep(self.timings.probe_interval).await;
        }
    }

    fn launch(&mut self) -> Result<()> {
        let client_id = self.next_id;
        self.next_id += 1;
        self.launcher.launch(client_id)?;
        self.report.launched += 1;
        Ok(())
    }

    /// Disconnect workers whose process is gone, optionally replacing each one
    async fn retire(&mut self, exited: Vec<ClientId>, replace: bool) -> Result<()> {
        for client_id in exited {
            if !self.retired.insert(client_id) {
                debug!("Worker {} exited after being declared dead", client_id);
                continue;
            }
            warn!("Worker {} exited before the run ended", client_id);
            self.api.report_disconnect(client_id).await?;
            self.report.reaped += 1;

            if replace {
                self.launch()?;
                self.report.replaced += 1;
            }
        }
        Ok(())
    }

    /// Declare silent clients dead, optionally replacing each one
    async fn reap(&mut self, replace: bool) -> Result<()> {
        let snapshot = self.api.liveness_snapshot().await?;
        let now = self.clock.now();

        for (client_id, last_seen) in snapshot {
            let silent = age(now, last_seen);
            if silent <= self.timings.dead_threshold {
                continue;
            }

            warn!(
                "Worker {} silent for {}s, declaring it dead",
                client_id,
                silent.as_secs()
            );
            self.api.report_disconnect(client_id).await?;
            self.retired.insert(client_id);
            self.report.reaped += 1;

            if replace {
                self.launch()?;
                self.report.replaced += 1;
            }
        }
        Ok(())
    }
}
