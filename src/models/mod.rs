//! Data models for parallel test execution
//!
//! Work item identity, item outcomes, and session-level aggregation.

mod item;
mod outcome;
mod session;

pub use item::{ItemCollection, ItemId, ItemIndex, WorkItem};
pub use outcome::{ItemResult, Outcome};
pub use session::{generate_session_id, ItemRecord, SessionCounts, SessionResults};
