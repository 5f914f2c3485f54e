//! In-process fixtures for worker and supervisor tests

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::{Timings, Worker, WorkerLauncher};
use crate::coordinator::{ClientId, Coordinator, SchedulerState};
use crate::models::{ItemCollection, ItemId, ItemResult, Outcome, WorkItem};
use crate::utils::SharedClock;

/// Work item with a scripted outcome
pub struct FakeItem {
    id: ItemId,
    outcome: Outcome,
    duration: Duration,
    hang_once: Option<(AtomicBool, Arc<Notify>)>,
}

impl FakeItem {
    pub fn new(index: usize, duration: Duration) -> Self {
        Self {
            id: ItemId::new("suite.py", format!("test_{index}"), ""),
            outcome: Outcome::Success,
            duration,
            hang_once: None,
        }
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// The first run signals `started` and never returns
    pub fn hang_once(mut self, started: Arc<Notify>) -> Self {
        self.hang_once = Some((AtomicBool::new(true), started));
        self
    }

    pub fn collection(n: usize, duration: Duration) -> ItemCollection {
        Arc::new(
            (0..n)
                .map(|i| Arc::new(FakeItem::new(i, duration)) as Arc<dyn WorkItem>)
                .collect(),
        )
    }
}

#[async_trait]
impl WorkItem for FakeItem {
    fn id(&self) -> &ItemId {
        &self.id
    }

    async fn run(&self) -> ItemResult {
        if let Some((armed, started)) = &self.hang_once {
            if armed.swap(false, Ordering::SeqCst) {
                started.notify_one();
                std::future::pending::<()>().await;
            }
        }

        tokio::time::sleep(self.duration).await;
        let ms = self.duration.as_millis() as u64;
        match self.outcome {
            Outcome::Success => ItemResult::success(ms),
            Outcome::Failure => ItemResult::failure(ms, json!({"message": "assertion failed"})),
            Outcome::Error => ItemResult::error(ms, json!({"message": "fixture exploded"})),
            Outcome::Skip => ItemResult::skip("not today"),
        }
    }
}

pub fn ids_of(items: &ItemCollection) -> Vec<ItemId> {
    items.iter().map(|i| i.id().clone()).collect()
}

pub fn coordinator(ids: Vec<ItemId>, stop_on_error: bool, clock: SharedClock) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        SchedulerState::new("test-session", ids, stop_on_error),
        clock,
    ))
}

/// Launches workers as tokio tasks sharing one in-process coordinator
pub struct TaskLauncher {
    coordinator: Arc<Coordinator>,
    items: ItemCollection,
    clock: SharedClock,
    timings: Timings,
    tasks: Mutex<HashMap<ClientId, JoinHandle<anyhow::Result<usize>>>>,
    exit_on_launch: HashSet<ClientId>,
    exited: Mutex<Vec<ClientId>>,
}

impl TaskLauncher {
    pub fn new(coordinator: Arc<Coordinator>, items: ItemCollection, clock: SharedClock) -> Self {
        Self {
            coordinator,
            items,
            clock,
            timings: Timings::default(),
            tasks: Mutex::new(HashMap::new()),
            exit_on_launch: HashSet::new(),
            exited: Mutex::new(Vec::new()),
        }
    }

    /// Worker `client_id` dies as soon as it starts, before connecting
    pub fn exit_on_launch(mut self, client_id: ClientId) -> Self {
        self.exit_on_launch.insert(client_id);
        self
    }

    /// Abort a worker as if its process died
    pub fn kill(&self, client_id: ClientId) {
        if let Some(task) = self.tasks.lock().unwrap().remove(&client_id) {
            task.abort();
        }
    }

    pub fn launched(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.tasks.lock().unwrap().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Items executed per surviving worker
    pub async fn join(&self) -> HashMap<ClientId, usize> {
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain().collect();
        let mut executed = HashMap::new();
        for (client_id, task) in tasks {
            executed.insert(client_id, task.await.unwrap().unwrap());
        }
        executed
    }
}

impl WorkerLauncher for TaskLauncher {
    fn launch(&self, client_id: ClientId) -> anyhow::Result<()> {
        if self.exit_on_launch.contains(&client_id) {
            self.exited.lock().unwrap().push(client_id);
            return Ok(());
        }

        let worker = Worker::new(
            client_id,
            self.coordinator.clone(),
            self.items.clone(),
            self.clock.clone(),
            self.timings.clone(),
        );
        let task = tokio::spawn(async move { worker.run().await });
        self.tasks.lock().unwrap().insert(client_id, task);
        Ok(())
    }

    fn exited(&self) -> Vec<ClientId> {
        std::mem::take(&mut *self.exited.lock().unwrap())
    }
}
