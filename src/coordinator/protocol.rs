//! RPC protocol
//!
//! Request and response bodies shared by the coordinator server and the
//! remote client, plus the [`CoordinatorApi`] seam both sides implement.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ItemId, ItemResult};

/// A worker's identity as seen by the coordinator
pub type ClientId = u64;

/// Liveness table: client → last contact
pub type LivenessSnapshot = BTreeMap<ClientId, DateTime<Utc>>;

/// Answer to `get_item`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Assignment {
    /// Run this item
    Item { item: ItemId },
    /// Work remains but is held by other clients; back off and ask again
    Pending,
    /// Stop
    End,
}

/// Body of every per-client call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRequest {
    pub client_id: ClientId,
}

/// Body of `report_done`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportDoneRequest {
    pub client_id: ClientId,
    #[serde(flatten)]
    pub result: ItemResult,
}

/// Coordinator operations, callable in-process or over the network
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn connect(&self, client_id: ClientId) -> Result<()>;

    async fn get_item(&self, client_id: ClientId) -> Result<Assignment>;

    async fn report_done(&self, client_id: ClientId, result: ItemResult) -> Result<()>;

    async fn heartbeat(&self, client_id: ClientId) -> Result<()>;

    async fn report_disconnect(&self, client_id: ClientId) -> Result<()>;

    async fn liveness_snapshot(&self) -> Result<LivenessSnapshot>;

    async fn no_more_work(&self) -> Result<bool>;

    /// Succeeds once the coordinator answers at all
    async fn probe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use serde_json::json;

    #[test]
    fn test_assignment_wire_format() {
        let item = Assignment::Item {
            item: ItemId::new("a.py", "test_a", "1"),
        };
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"status": "item", "item": {"path": "a.py", "function": "test_a", "variation": "1"}})
        );
        assert_eq!(
            serde_json::to_value(Assignment::Pending).unwrap(),
            json!({"status": "pending"})
        );
        let end: Assignment = serde_json::from_value(json!({"status": "end"})).unwrap();
        assert_eq!(end, Assignment::End);
    }

    #[test]
    fn test_report_done_is_flat() {
        let body = ReportDoneRequest {
            client_id: 3,
            result: ItemResult::failure(4, json!({"exit_code": 2})),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["client_id"], 3);
        assert_eq!(value["outcome"], "failure");
        assert_eq!(value["failures"][0]["exit_code"], 2);

        let parsed: ReportDoneRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.result.outcome, Outcome::Failure);
    }
}
