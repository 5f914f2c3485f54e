//! Clock abstraction
//!
//! All polling and liveness arithmetic goes through [`Clock`] so scheduling
//! behaviour can be exercised under tokio's paused time.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Source of wall-clock timestamps and delays
pub trait Clock: Send + Sync {
    /// Current timestamp
    fn now(&self) -> DateTime<Utc>;

    /// Wait for `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

pub type SharedClock = Arc<dyn Clock>;

/// Real time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock driven by tokio's time source, anchored at a fixed epoch.
///
/// Under `#[tokio::test(start_paused = true)]` time only moves when every task
/// is idle or when `tokio::time::advance` is called.
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct VirtualClock {
    epoch: DateTime<Utc>,
    origin: tokio::time::Instant,
}

#[cfg(test)]
impl VirtualClock {
    pub fn new() -> Self {
        Self {
            epoch: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + elapsed
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Time elapsed between `since` and `now`, clamped at zero
pub fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
