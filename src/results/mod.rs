//! Results persistence
//!
//! Stores per-session resume state so failed or unfinished items can be rerun.

mod storage;

pub use storage::{ResumeError, ResumeStore, StoredSession};
