//! Output formatting module
//!
//! Renders session summaries and the recorded sessions list.

mod formatter;

pub use formatter::{OutputFormat, SummaryFormatter};
