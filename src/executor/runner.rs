//! Local session execution
//!
//! Runs items one after another in this process, without a coordinator.

use std::future::Future;
use tracing::{info, warn};

use super::{Completion, SessionRun};
use crate::models::{ItemCollection, SessionResults};
use crate::utils::Timer;

/// Sequential runner
pub struct LocalRunner {
    stop_on_error: bool,
}

impl LocalRunner {
    pub fn new(stop_on_error: bool) -> Self {
        Self { stop_on_error }
    }

    /// Run all items in collection order, stopping early once `interrupt`
    /// resolves. The item running at that moment is abandoned.
    pub async fn run_all(
        &self,
        session_id: &str,
        items: &ItemCollection,
        interrupt: impl Future<Output = ()>,
    ) -> SessionRun {
        info!("Starting local run of {} items", items.len());

        let timer = Timer::start("local run");
        let mut results = SessionResults::new(session_id, items.iter().map(|i| i.id().clone()));
        let mut completion = Completion::Finished;
        tokio::pin!(interrupt);

        for (index, item) in items.iter().enumerate() {
            info!("Running {}", item.id());
            let result = tokio::select! {
                result = item.run() => result,
                _ = &mut interrupt => {
                    warn!("Interrupted while running {}", item.id());
                    completion = Completion::Interrupted;
                    break;
                }
            };
            info!("  {} {}", result.outcome, item.id());

            let failed = result.outcome.is_failed();
            results.record(index, result);

            if failed && self.stop_on_error {
                warn!("Stopping after first failure ({})", item.id());
                break;
            }
        }

        let counts = results.counts();
        info!(
            "Local run completed in {}ms - Pass: {}/{}",
            timer.stop(),
            counts.passed,
            counts.total
        );
        SessionRun {
            results,
            completion,
        }
    }
}
