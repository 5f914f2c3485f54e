//! Worker loop
//!
//! A worker connects once, then repeatedly asks for an item, runs it while a
//! heartbeat task keeps its liveness fresh, and reports the outcome.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Timings;
use crate::coordinator::{Assignment, ClientId, CoordinatorApi, CoordinatorError};
use crate::http::RpcError;
use crate::models::{ItemCollection, ItemId, ItemIndex, ItemResult};
use crate::utils::SharedClock;

/// Aborts the heartbeat task when the item finishes or the worker goes away.
/// The task itself only returns once the coordinator refuses a heartbeat.
struct HeartbeatGuard(JoinHandle<anyhow::Error>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Worker {
    client_id: ClientId,
    api: Arc<dyn CoordinatorApi>,
    items: ItemCollection,
    index: ItemIndex,
    clock: SharedClock,
    timings: Timings,
}

impl Worker {
    pub fn new(
        client_id: ClientId,
        api: Arc<dyn CoordinatorApi>,
        items: ItemCollection,
        clock: SharedClock,
        timings: Timings,
    ) -> Self {
        let index = ItemIndex::build(&items);
        Self {
            client_id,
            api,
            items,
            index,
            clock,
            timings,
        }
    }

    /// Work until the coordinator says `End`. Returns the number of items run.
    pub async fn run(&self) -> Result<usize> {
        self.api.connect(self.client_id).await?;
        info!(
            "Worker {} connected ({} items known)",
            self.client_id,
            self.index.len()
        );

        let mut executed = 0;
        loop {
            match self.api.get_item(self.client_id).await? {
                Assignment::End => break,
                Assignment::Pending => {
                    debug!(
                        "Worker {} waiting {:?} for work",
                        self.client_id, self.timings.pending_backoff
                    );
                    self.clock.sleep(self.timings.pending_backoff).await;
                }
                Assignment::Item { item } => {
                    let mut heartbeat = self.start_heartbeat();
                    let result = tokio::select! {
                        result = self.execute(&item) => result,
                        refused = &mut heartbeat.0 => {
                            let reason = match refused {
                                Ok(err) => err.to_string(),
                                Err(err) => err.to_string(),
                            };
                            warn!(
                                "Worker {} lost {} ({}), exiting",
                                self.client_id, item, reason
                            );
                            break;
                        }
                    };
                    drop(heartbeat);

                    debug!("Worker {} finished {}: {}", self.client_id, item, result.outcome);
                    match self.api.report_done(self.client_id, result).await {
                        Ok(()) => executed += 1,
                        Err(e) if is_rejection(&e) => {
                            warn!(
                                "Worker {} result for {} refused ({}), exiting",
                                self.client_id, item, e
                            );
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        info!("Worker {} done after {} items", self.client_id, executed);
        Ok(executed)
    }

    async fn execute(&self, id: &ItemId) -> ItemResult {
        match self.index.position(id) {
            Some(position) => self.items[position].run().await,
            None => {
                warn!("Worker {} was assigned unknown item {}", self.client_id, id);
                ItemResult::error(
                    0,
                    json!({"message": format!("item {id} is not in this worker's collection")}),
                )
            }
        }
    }

    fn start_heartbeat(&self) -> HeartbeatGuard {
        let api = self.api.clone();
        let clock = self.clock.clone();
        let client_id = self.client_id;
        let period = self.timings.heartbeat;

        HeartbeatGuard(tokio::spawn(async move {
            loop {
                clock.sleep(period).await;
                match api.heartbeat(client_id).await {
                    Ok(()) => {}
                    Err(e) if is_rejection(&e) => return e,
                    Err(e) => warn!("Heartbeat from worker {} failed: {}", client_id, e),
                }
            }
        }))
    }
}

/// The coordinator answered and refused the call, in process or over HTTP
fn is_rejection(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CoordinatorError>().is_some()
        || err
            .downcast_ref::<RpcError>()
            .is_some_and(RpcError::is_rejection)
}
