//! Frame clock for refresh-aligned compositing.
//!
//! In vsync mode the scheduler batches every tile composite and replays
//! them on the next frame boundary, producing one atomic update instead of
//! a visibly incremental one. [`FrameClock`] provides that boundary: a
//! monotonic epoch plus a fixed refresh interval.

use std::time::{Duration, Instant};

/// A fixed-rate refresh signal.
#[derive(Debug, Clone)]
pub struct FrameClock {
    epoch: Instant,
    interval: Duration,
}

impl FrameClock {
    /// Create a clock ticking at the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval,
        }
    }

    /// Create a clock from a refresh rate in Hz.
    ///
    /// # Panics
    ///
    /// Panics if `hz` is zero.
    pub fn refresh_rate(hz: u32) -> Self {
        assert!(hz > 0, "refresh rate must be non-zero");
        Self::new(Duration::from_secs(1) / hz)
    }

    /// The refresh interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next frame boundary.
    ///
    /// Boundaries are multiples of the interval since the clock's epoch,
    /// so callers arriving at arbitrary times align to a shared cadence
    /// rather than each getting a full interval of delay.
    pub async fn wait_refresh(&self) {
        if self.interval.is_zero() {
            return;
        }
        let elapsed = self.epoch.elapsed();
        let ticks = elapsed.as_nanos() / self.interval.as_nanos() + 1;
        let target = Duration::from_nanos((ticks * self.interval.as_nanos()) as u64);
        tokio::time::sleep(target - elapsed).await;
    }
}

impl Default for FrameClock {
    /// A 60 Hz clock.
    fn default() -> Self {
        Self::refresh_rate(60)
    }
}
