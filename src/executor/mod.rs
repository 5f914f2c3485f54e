//! Execution engine
//!
//! Workers pull items from a coordinator, the fleet supervisor keeps a set of
//! worker processes alive, and the runners drive a whole session either
//! locally or across a fleet.

mod launcher;
mod parallel;
mod runner;
mod supervisor;
#[cfg(test)]
mod testing;
mod worker;

pub use launcher::{ProcessLauncher, WorkerLauncher};
pub use parallel::ParallelExecutor;
pub use runner::LocalRunner;
pub use supervisor::FleetSupervisor;
pub use worker::Worker;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::models::SessionResults;

/// How a session stopped
#[derive(Debug)]
pub enum Completion {
    /// Every item settled
    Finished,
    /// Stopped early by the user
    Interrupted,
    /// Scheduling broke down
    Failed(anyhow::Error),
}

/// Results of a session, complete or not. Items that never reported stay
/// unrecorded and count as not run.
#[derive(Debug)]
pub struct SessionRun {
    pub results: SessionResults,
    pub completion: Completion,
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be watched.
pub fn interrupted() -> impl Future<Output = ()> {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot watch for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Polling and liveness intervals shared by workers and the supervisor
#[derive(Clone, Debug, PartialEq)]
pub struct Timings {
    /// Worker heartbeat period while an item is in flight
    pub heartbeat: Duration,
    /// Worker sleep after a `Pending` answer
    pub pending_backoff: Duration,
    /// Supervisor liveness poll period
    pub poll_interval: Duration,
    /// Silence after which a client is declared dead
    pub dead_threshold: Duration,
    /// How long the supervisor waits for the coordinator to answer
    pub probe_timeout: Duration,
    /// Delay between reachability probes
    pub probe_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            pending_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            dead_threshold: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(1),
        }
    }
}
