//! Wall-clock timestamps anchored on tokio's clock.
//!
//! All timestamps on the wire are milliseconds since the Unix epoch, while
//! every deadline inside the bridge is a [`tokio::time::Instant`]. A [`Clock`]
//! pins an epoch value to an instant and derives later timestamps from the
//! elapsed tokio time, so a paused runtime moves both together.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Epoch-millisecond view of tokio's clock
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch_ms: u64,
    origin: Instant,
}

impl Clock {
    /// Clock anchored on the system time
    pub fn system() -> Self {
        Self::starting_at(unix_now_ms())
    }

    /// Clock reading `epoch_ms` right now
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn now_ms(&self) -> u64 {
        self.at(Instant::now())
    }

    /// Epoch milliseconds corresponding to `instant`
    pub fn at(&self, instant: Instant) -> u64 {
        self.epoch_ms
            .saturating_add(millis(instant.saturating_duration_since(self.origin)))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

/// Convert a duration to whole milliseconds, saturating
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Current system time in milliseconds since the Unix epoch
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}
