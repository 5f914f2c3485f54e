//! Work item identity and execution contract
//!
//! Items are produced by the suite collaborator and only ever referenced by
//! the scheduler, either by position or by their three-part identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ItemResult;

/// Stable identity of a work item: (source path, function name, variation id)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId {
    pub path: String,
    pub function: String,
    #[serde(default)]
    pub variation: String,
}

impl ItemId {
    pub fn new(
        path: impl Into<String>,
        function: impl Into<String>,
        variation: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            function: function.into(),
            variation: variation.into(),
        }
    }

    /// Human readable address, `path:function[variation]`
    pub fn address(&self) -> String {
        if self.variation.is_empty() {
            format!("{}:{}", self.path, self.function)
        } else {
            format!("{}:{}[{}]", self.path, self.function, self.variation)
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// A schedulable unit of execution
#[async_trait]
pub trait WorkItem: Send + Sync {
    /// Identity used on the wire and in the resume store
    fn id(&self) -> &ItemId;

    /// Execute the item. Item-level problems are reported through the result,
    /// never as an `Err`.
    async fn run(&self) -> ItemResult;
}

/// Shared, immutable, ordered item collection
pub type ItemCollection = Arc<Vec<Arc<dyn WorkItem>>>;

/// Identity to position lookup, built once per collection
#[derive(Debug, Default)]
pub struct ItemIndex {
    positions: HashMap<ItemId, usize>,
}

impl ItemIndex {
    pub fn build(items: &[Arc<dyn WorkItem>]) -> Self {
        let positions = items
            .iter()
            .enumerate()
            .map(|(index, item)| (item.id().clone(), index))
            .collect();
        Self { positions }
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }
}
