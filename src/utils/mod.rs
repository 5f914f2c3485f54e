//! Shared utilities: clock, timing, and logging setup.

pub mod clock;
pub mod logger;
pub mod timer;

pub use clock::{age, SharedClock, SystemClock};
#[cfg(test)]
pub use clock::{Clock, VirtualClock};
pub use timer::Timer;
