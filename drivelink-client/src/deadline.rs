//! Deadline tracking on the tokio clock
//!
//! All timing uses [`tokio::time::Instant`], so tests running with a paused runtime clock see
//! simulated time.
use std::time::Duration;

use tokio::time::Instant;

/// A mark on the monotonic clock, plus how long a wait started at that mark may last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    mark: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Start a new wait of `timeout` at the current time
    pub fn arm(timeout: Duration) -> Self {
        Self {
            mark: Instant::now(),
            timeout,
        }
    }

    /// Restart the wait from the current time, keeping the timeout
    pub fn rearm(&mut self) {
        self.mark = Instant::now();
    }

    /// Time since the deadline was armed
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.mark)
    }

    /// True once strictly more than the timeout has elapsed since the mark
    pub fn expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    /// Time left before the deadline expires
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    /// The instant at which the wait times out, for use with [`tokio::time::timeout_at`]
    pub fn instant(&self) -> Instant {
        self.mark + self.timeout
    }

    /// The configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
