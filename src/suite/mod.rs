//! Suite collaborator
//!
//! Turns a manifest file into the ordered work-item collection the scheduler
//! consumes, with each item backed by an external command.

mod command;
mod manifest;

pub use command::CommandItem;
pub use manifest::Manifest;
