//! Coordinator
//!
//! Single authoritative scheduler for one run. [`Coordinator`] wraps the
//! [`SchedulerState`] in one lock so every RPC is applied atomically, and is
//! exposed to remote workers by the HTTP server in [`server`].

mod protocol;
pub mod server;
mod state;

pub use protocol::{
    Assignment, ClientId, ClientRequest, CoordinatorApi, LivenessSnapshot, ReportDoneRequest,
};
pub use state::SchedulerState;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

use crate::models::{ItemResult, SessionResults};
use crate::utils::SharedClock;

/// Scheduling-layer errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Client {0} reported a result without holding an item")]
    NotAssigned(ClientId),

    #[error("Client {0} is not connected")]
    UnknownClient(ClientId),
}

/// Thread-safe coordinator service
pub struct Coordinator {
    state: Mutex<SchedulerState>,
    clock: SharedClock,
    finished: watch::Sender<bool>,
}

impl Coordinator {
    pub fn new(state: SchedulerState, clock: SharedClock) -> Self {
        let (finished, _) = watch::channel(state.is_finished());
        Self {
            state: Mutex::new(state),
            clock,
            finished,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one operation under the lock and publish the finished flag
    fn apply<R>(&self, op: impl FnOnce(&mut SchedulerState, DateTime<Utc>) -> R) -> R {
        let mut state = self.lock();
        let out = op(&mut state, self.clock.now());
        let finished = state.is_finished();
        drop(state);

        self.finished.send_if_modified(|current| {
            let changed = *current != finished;
            *current = finished;
            changed
        });
        out
    }

    /// Resolves once no work is left and no client is connected
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as `self`, so this only fails on drop.
        let _ = rx.wait_for(|finished| *finished).await;
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.lock().is_finished()
    }

    /// Copy of the aggregated results so far
    pub fn results(&self) -> SessionResults {
        self.lock().results().clone()
    }

    /// Run a read-only closure against the current state
    #[cfg(test)]
    pub fn inspect<R>(&self, f: impl FnOnce(&SchedulerState) -> R) -> R {
        f(&self.lock())
    }
}

#[async_trait]
impl CoordinatorApi for Coordinator {
    async fn connect(&self, client_id: ClientId) -> Result<()> {
        self.apply(|s, now| s.connect(client_id, now));
        Ok(())
    }

    async fn get_item(&self, client_id: ClientId) -> Result<Assignment> {
        Ok(self.apply(|s, now| s.get_item(client_id, now)))
    }

    async fn report_done(&self, client_id: ClientId, result: ItemResult) -> Result<()> {
        self.apply(|s, now| s.report_done(client_id, result, now))?;
        Ok(())
    }

    async fn heartbeat(&self, client_id: ClientId) -> Result<()> {
        self.apply(|s, now| s.heartbeat(client_id, now))?;
        Ok(())
    }

    async fn report_disconnect(&self, client_id: ClientId) -> Result<()> {
        self.apply(|s, _| s.report_disconnect(client_id));
        Ok(())
    }

    async fn liveness_snapshot(&self) -> Result<LivenessSnapshot> {
        Ok(self.lock().liveness_snapshot())
    }

    async fn no_more_work(&self) -> Result<bool> {
        Ok(self.lock().no_more_work())
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}
