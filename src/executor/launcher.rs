//! Worker launching
//!
//! The supervisor only knows how to ask for "a worker with this id"; how that
//! worker comes to exist is up to the launcher.

use anyhow::{Context, Result};
use std::mem;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::coordinator::ClientId;

/// Starts worker instances on behalf of the supervisor
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker that will identify itself as `client_id`
    fn launch(&self, client_id: ClientId) -> Result<()>;

    /// Workers known to have exited since the last call. Launchers that cannot
    /// tell report nothing and leave detection to liveness.
    fn exited(&self) -> Vec<ClientId> {
        Vec::new()
    }
}

/// Launches each worker as a child process
///
/// The child is started as `program args... --worker-id ID` with its standard
/// streams discarded.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    children: Mutex<Vec<(ClientId, Child)>>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Re-invoke the running executable
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate current executable")?;
        Ok(Self::new(program, args))
    }

    /// Wait up to `grace` for each launched child to exit, killing any that
    /// outlive it. Returns how many had to be killed.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let children = mem::take(
            &mut *self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut killed = 0;
        for (client_id, mut child) in children {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!("Worker {} exited with {}", client_id, status),
                Ok(Err(e)) => warn!("Failed to wait for worker {}: {}", client_id, e),
                Err(_) => {
                    warn!("Worker {} still running after the run ended, killing it", client_id);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill worker {}: {}", client_id, e);
                    }
                    killed += 1;
                }
            }
        }
        killed
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, client_id: ClientId) -> Result<()> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg("--worker-id")
            .arg(client_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to launch worker {} ({})",
                    client_id,
                    self.program.display()
                )
            })?;

        info!("Launched worker {} (pid {:?})", client_id, child.id());
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((client_id, child));
        Ok(())
    }

    fn exited(&self) -> Vec<ClientId> {
        let mut children = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut exited = Vec::new();
        children.retain_mut(|(client_id, child)| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!("Worker {} exited with {}", client_id, status);
                exited.push(*client_id);
                false
            }
            Err(e) => {
                warn!("Failed to poll worker {}: {}", client_id, e);
                true
            }
        });
        exited
    }
}
