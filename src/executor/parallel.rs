//! Parallel session execution
//!
//! Serves a coordinator over HTTP, supervises a fleet of worker processes
//! against it, and returns the aggregated session once every item is settled.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{Completion, FleetSupervisor, ProcessLauncher, SessionRun, Timings, WorkerLauncher};
use crate::coordinator::{server, Coordinator, SchedulerState};
use crate::http::CoordinatorClient;
use crate::models::ItemId;
use crate::utils::{SharedClock, SystemClock};

/// Coordinator plus fleet for one session
pub struct ParallelExecutor {
    workers: usize,
    host: String,
    port: u16,
    stop_on_error: bool,
    rpc_timeout_secs: u64,
    timings: Timings,
    clock: SharedClock,
}

impl ParallelExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            host: "127.0.0.1".to_string(),
            port: 0,
            stop_on_error: false,
            rpc_timeout_secs: 30,
            timings: Timings::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Address the coordinator listens on; port 0 picks a free one
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.rpc_timeout_secs = secs;
        self
    }

    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Host workers and the supervisor dial
    fn connect_host(&self) -> &str {
        match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            host => host,
        }
    }

    /// Run `ids` across worker processes started as
    /// `<current exe> worker_args... --host H --port P --worker-id N`.
    ///
    /// Only setup failures are errors. Once the coordinator exists the
    /// session is always returned, with how it stopped.
    pub async fn run(
        &self,
        session_id: &str,
        ids: Vec<ItemId>,
        worker_args: Vec<String>,
        interrupt: impl Future<Output = ()>,
    ) -> Result<SessionRun> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to bind coordinator on {}:{}", self.host, self.port))?;
        let port = listener.local_addr()?.port();

        let mut args = worker_args;
        args.extend([
            "--host".to_string(),
            self.connect_host().to_string(),
            "--port".to_string(),
            port.to_string(),
        ]);
        let launcher = Arc::new(ProcessLauncher::current_exe(args)?);

        let run = self
            .serve_fleet(listener, port, session_id, ids, launcher.clone(), interrupt)
            .await;

        let grace = match run.completion {
            Completion::Finished => self.timings.dead_threshold,
            _ => Duration::ZERO,
        };
        let killed = launcher.shutdown(grace).await;
        if killed > 0 {
            debug!("Killed {} leftover workers", killed);
        }
        Ok(run)
    }

    async fn serve_fleet(
        &self,
        listener: TcpListener,
        port: u16,
        session_id: &str,
        ids: Vec<ItemId>,
        launcher: Arc<dyn WorkerLauncher>,
        interrupt: impl Future<Output = ()>,
    ) -> SessionRun {
        info!(
            "Running {} items on {} workers (coordinator port {})",
            ids.len(),
            self.workers,
            port
        );

        let coordinator = Arc::new(Coordinator::new(
            SchedulerState::new(session_id, ids, self.stop_on_error),
            self.clock.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(server::serve(
            listener,
            coordinator.clone(),
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        let supervised = async {
            let client = Arc::new(CoordinatorClient::with_timeout(
                self.connect_host(),
                port,
                self.rpc_timeout_secs,
            )?);
            let report = FleetSupervisor::new(
                client,
                launcher,
                self.clock.clone(),
                self.timings.clone(),
            )
            .run(self.workers)
            .await?;
            debug!("Supervisor report: {:?}", report);

            coordinator.wait_finished().await;
            Ok::<(), anyhow::Error>(())
        };

        let mut completion = tokio::select! {
            outcome = supervised => match outcome {
                Ok(()) => Completion::Finished,
                Err(e) => {
                    error!("Fleet run failed: {:#}", e);
                    Completion::Failed(e)
                }
            },
            _ = interrupt => {
                warn!("Interrupted, stopping the fleet");
                Completion::Interrupted
            }
        };

        let _ = shutdown_tx.send(());
        let served = server
            .await
            .context("Coordinator server task failed")
            .and_then(|served| served.context("Coordinator server failed"));
        if let Err(e) = served {
            error!("{:#}", e);
            if matches!(completion, Completion::Finished) {
                completion = Completion::Failed(e);
            }
        }

        SessionRun {
            results: coordinator.results(),
            completion,
        }
    }
}
