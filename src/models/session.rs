//! Session result aggregation
//!
//! Collects per-item results for one run, in collection order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ItemId, ItemResult, Outcome};

/// Result slot for one item of the session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    /// `None` when the item never reached a terminal outcome
    pub result: Option<ItemResult>,
}

impl ItemRecord {
    /// Failed, errored, or never finished
    pub fn needs_rerun(&self) -> bool {
        match &self.result {
            Some(result) => result.outcome.is_failed(),
            None => true,
        }
    }
}

/// Counters over a session's records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub duration_ms: u64,
}

/// Aggregated results of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResults {
    pub session_id: String,
    pub records: Vec<ItemRecord>,
}

impl SessionResults {
    pub fn new(session_id: impl Into<String>, ids: impl IntoIterator<Item = ItemId>) -> Self {
        Self {
            session_id: session_id.into(),
            records: ids
                .into_iter()
                .map(|id| ItemRecord { id, result: None })
                .collect(),
        }
    }

    /// Store the result for the item at `index`. Out of range indices are ignored.
    pub fn record(&mut self, index: usize, result: ItemResult) {
        if let Some(slot) = self.records.get_mut(index) {
            slot.result = Some(result);
        }
    }

    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts {
            total: self.records.len(),
            ..SessionCounts::default()
        };

        for record in &self.records {
            match &record.result {
                Some(result) => {
                    counts.duration_ms += result.duration_ms;
                    match result.outcome {
                        Outcome::Success => counts.passed += 1,
                        Outcome::Failure => counts.failed += 1,
                        Outcome::Error => counts.errors += 1,
                        Outcome::Skip => counts.skipped += 1,
                    }
                }
                None => counts.not_run += 1,
            }
        }

        counts
    }

    /// Every item finished, and nothing failed
    pub fn is_success(&self, allow_skips: bool) -> bool {
        let counts = self.counts();
        counts.failed == 0
            && counts.errors == 0
            && counts.not_run == 0
            && (allow_skips || counts.skipped == 0)
    }

    pub fn rerun_count(&self) -> usize {
        self.records.iter().filter(|r| r.needs_rerun()).count()
    }
}

impl fmt::Display for SessionResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        write!(
            f,
            "Session {}: {} items | Pass: {} | Fail: {} | Error: {} | Skip: {} | Not run: {}",
            self.session_id,
            counts.total,
            counts.passed,
            counts.failed,
            counts.errors,
            counts.skipped,
            counts.not_run
        )
    }
}

/// Generate a unique session ID
pub fn generate_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random();
    format!("{timestamp}_{random:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n)
            .map(|i| ItemId::new("suite.py", format!("test_{i}"), ""))
            .collect()
    }

    #[test]
    fn test_counts_and_success() {
        let mut session = SessionResults::new("s1", ids(4));
        session.record(0, ItemResult::success(10));
        session.record(1, ItemResult::failure(5, json!("nope")));
        session.record(2, ItemResult::skip("later"));

        let counts = session.counts();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.not_run, 1);
        assert_eq!(counts.duration_ms, 15);
        assert!(!session.is_success(true));
        assert_eq!(session.rerun_count(), 2);
    }

    #[test]
    fn test_skips_only_fail_when_disallowed() {
        let mut session = SessionResults::new("s2", ids(2));
        session.record(0, ItemResult::success(1));
        session.record(1, ItemResult::skip("n/a"));

        assert!(session.is_success(true));
        assert!(!session.is_success(false));
    }

    #[test]
    fn test_generate_session_id() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert!(!id1.is_empty());
        assert_ne!(id1, id2);
    }
}
