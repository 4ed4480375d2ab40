//! Heartbeat liveness tracking
//!
//! The command loop is the only writer of the clock; the watchdog and the
//! stats snapshot read it. The last beat is kept as a millisecond offset from
//! the clock's epoch so a single atomic store publishes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::NetworkError;

/// Session-scoped record of the last heartbeat received
#[derive(Debug)]
pub struct HeartbeatClock {
    epoch: Instant,
    last_beat_ms: AtomicU64,
}

impl HeartbeatClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
        }
    }

    /// Record a received heartbeat. Also restarts the liveness window when
    /// streaming begins.
    pub fn beat(&self) {
        self.last_beat_ms.store(self.offset_ms(), Ordering::Release);
    }

    /// Time elapsed since the last heartbeat (or reset)
    pub fn since_last(&self) -> Duration {
        let last = self.last_beat_ms.load(Ordering::Acquire);
        Duration::from_millis(self.offset_ms().saturating_sub(last))
    }

    fn offset_ms(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_millis() as u64
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the clock every `check_interval` and fail once the silence exceeds
/// `timeout`. Only returns on timeout.
pub async fn watchdog(
    clock: &HeartbeatClock,
    check_interval: Duration,
    timeout: Duration,
) -> NetworkError {
    let mut ticker = interval_at(Instant::now() + check_interval, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let silence = clock.since_last();
        debug!(silence_ms = silence.as_millis() as u64, "check heartbeat");
        if silence > timeout {
            warn!("heartbeat timeout after {:?}", silence);
            return NetworkError::HeartbeatTimeout(silence);
        }
    }
}
