//! Windowed throughput meter for the aggregate download speed.
//!
//! The manager keeps one monotonically increasing counter of bytes received
//! across all agents; a sampling loop feeds it through this meter at a
//! fixed interval and publishes the result as bytes per second.

use std::time::Duration;

/// Computes bytes/sec from successive readings of a monotone counter.
pub(crate) struct SpeedMeter {
    last_total: Option<u64>,
}

impl SpeedMeter {
    pub fn new() -> Self {
        Self { last_total: None }
    }

    /// Record a reading taken `elapsed` after the previous one and return
    /// the rate over that window. The first reading only establishes the
    /// baseline and reports 0.
    pub fn sample(&mut self, total: u64, elapsed: Duration) -> u64 {
        let last = self.last_total.replace(total);
        let Some(last) = last else {
            return 0;
        };
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        let delta = total.saturating_sub(last);
        (delta as f64 / secs) as u64
    }

    /// Re-baseline without reporting a rate. Used when nothing is
    /// transferring so idle windows do not fabricate a burst later.
    pub fn reset(&mut self, total: u64) {
        self.last_total = Some(total);
    }
}
