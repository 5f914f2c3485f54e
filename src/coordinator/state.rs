//! Scheduling state
//!
//! The work queue, the assignment ledger, and the liveness table for one run.
//! Every index of the item collection lives in exactly one of `pending`,
//! `in_flight` (as a value) or `done`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info, warn};

use super::protocol::{Assignment, ClientId};
use super::CoordinatorError;
use crate::models::{ItemId, ItemResult, SessionResults};

/// Authoritative queue and ledger. Not thread safe on its own; the
/// [`Coordinator`](super::Coordinator) serializes access.
#[derive(Debug)]
pub struct SchedulerState {
    ids: Vec<ItemId>,
    pending: VecDeque<usize>,
    in_flight: HashMap<ClientId, usize>,
    done: BTreeSet<usize>,
    liveness: HashMap<ClientId, DateTime<Utc>>,
    stop_on_error: bool,
    has_failed_item: bool,
    results: SessionResults,
}

impl SchedulerState {
    pub fn new(session_id: impl Into<String>, ids: Vec<ItemId>, stop_on_error: bool) -> Self {
        let results = SessionResults::new(session_id, ids.iter().cloned());
        Self {
            pending: (0..ids.len()).collect(),
            ids,
            in_flight: HashMap::new(),
            done: BTreeSet::new(),
            liveness: HashMap::new(),
            stop_on_error,
            has_failed_item: false,
            results,
        }
    }

    /// Register or refresh a client
    pub fn connect(&mut self, client_id: ClientId, now: DateTime<Utc>) {
        if self.liveness.insert(client_id, now).is_none() {
            info!("Client {} connected", client_id);
        } else {
            debug!("Client {} reconnected", client_id);
        }
    }

    /// Refresh a connected client. A client that was declared dead stays dead.
    pub fn heartbeat(
        &mut self,
        client_id: ClientId,
        now: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        match self.liveness.get_mut(&client_id) {
            Some(last_seen) => {
                debug!("Client {} sent heartbeat", client_id);
                *last_seen = now;
                Ok(())
            }
            None => {
                warn!("Heartbeat from unknown client {}, rejecting", client_id);
                Err(CoordinatorError::UnknownClient(client_id))
            }
        }
    }

    /// Hand out the next item, tell the client to wait, or tell it to stop
    pub fn get_item(&mut self, client_id: ClientId, now: DateTime<Utc>) -> Assignment {
        self.liveness.insert(client_id, now);

        // A client holds at most one item; asking again repeats the assignment.
        if let Some(&index) = self.in_flight.get(&client_id) {
            warn!(
                "Client {} asked for work while holding #{}, repeating assignment",
                client_id, index
            );
            return Assignment::Item {
                item: self.ids[index].clone(),
            };
        }

        if self.no_more_work() {
            self.liveness.remove(&client_id);
            info!("No more work, removing client {}", client_id);
            return Assignment::End;
        }

        match self.pending.pop_front() {
            Some(index) => {
                self.in_flight.insert(client_id, index);
                info!("#{}: {}, client {}", index, self.ids[index], client_id);
                Assignment::Item {
                    item: self.ids[index].clone(),
                }
            }
            None => Assignment::Pending,
        }
    }

    /// Retire the caller's assigned item
    pub fn report_done(
        &mut self,
        client_id: ClientId,
        result: ItemResult,
        now: DateTime<Utc>,
    ) -> Result<usize, CoordinatorError> {
        let index = self
            .in_flight
            .remove(&client_id)
            .ok_or(CoordinatorError::NotAssigned(client_id))?;
        self.liveness.insert(client_id, now);

        info!(
            "Client {} finished #{} {}: {}",
            client_id, index, self.ids[index], result.outcome
        );
        debug!(
            "Failures: {:?}, Errors: {:?}, Skips: {:?}",
            result.failures, result.errors, result.skips
        );

        if result.outcome.is_failed() && self.stop_on_error && !self.has_failed_item {
            info!("Item #{} failed, stopping further assignment", index);
            self.has_failed_item = true;
        }

        self.done.insert(index);
        self.results.record(index, result);
        Ok(index)
    }

    /// Forget a client; its assignment goes back to the tail of the queue.
    /// Returns the requeued index, if any.
    pub fn report_disconnect(&mut self, client_id: ClientId) -> Option<usize> {
        if self.liveness.remove(&client_id).is_none() {
            debug!("Disconnect reported for unknown client {}", client_id);
        }

        let index = self.in_flight.remove(&client_id)?;
        warn!(
            "Client {} disconnected while running #{} {}, requeueing",
            client_id, index, self.ids[index]
        );
        self.pending.push_back(index);
        Some(index)
    }

    pub fn liveness_snapshot(&self) -> BTreeMap<ClientId, DateTime<Utc>> {
        self.liveness.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Fail-fast tripped, or every item reached a terminal outcome
    pub fn no_more_work(&self) -> bool {
        (self.stop_on_error && self.has_failed_item) || self.done.len() == self.ids.len()
    }

    /// Nothing left to hand out and nobody left to talk to
    pub fn is_finished(&self) -> bool {
        self.no_more_work() && self.liveness.is_empty()
    }

    #[cfg(test)]
    pub fn has_failed_item(&self) -> bool {
        self.has_failed_item
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[cfg(test)]
    pub fn done_len(&self) -> usize {
        self.done.len()
    }

    pub fn results(&self) -> &SessionResults {
        &self.results
    }

    /// Checks that pending, in-flight and done partition the index range
    #[cfg(test)]
    pub fn assert_partition(&self) {
        let mut seen = vec![0usize; self.ids.len()];
        for &i in self
            .pending
            .iter()
            .chain(self.in_flight.values())
            .chain(self.done.iter())
        {
            seen[i] += 1;
        }
        assert!(
            seen.iter().all(|&n| n == 1),
            "index partition violated: {seen:?}"
        );
        for client in self.in_flight.keys() {
            assert!(
                self.liveness.contains_key(client),
                "in-flight client {client} has no liveness record"
            );
        }
    }
}
