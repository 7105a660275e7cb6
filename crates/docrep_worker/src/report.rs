//! Time-throttled progress accumulation.

use docrep_protocol::ReplicationStats;
use std::time::Duration;
use tokio::time::Instant;

/// Accumulates stats locally and releases them upstream at most once per
/// interval.
#[derive(Debug)]
pub(crate) struct StatsThrottle {
    pending: ReplicationStats,
    last_report: Instant,
    interval: Duration,
}

impl StatsThrottle {
    pub(crate) fn new(interval: Duration, now: Instant) -> Self {
        Self {
            pending: ReplicationStats::new(),
            last_report: now,
            interval,
        }
    }

    /// Merges `delta`. Once more than the interval has passed since the last
    /// report, returns everything accumulated and starts over from zero.
    pub(crate) fn add(&mut self, delta: ReplicationStats, now: Instant) -> Option<ReplicationStats> {
        self.pending += delta;
        if now.saturating_duration_since(self.last_report) > self.interval {
            self.last_report = now;
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Merges `delta` without considering a report.
    pub(crate) fn merge(&mut self, delta: ReplicationStats) {
        self.pending += delta;
    }

    /// Returns the accumulated stats and resets them to zero.
    pub(crate) fn take(&mut self) -> ReplicationStats {
        std::mem::take(&mut self.pending)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> ReplicationStats {
        self.pending
    }
}
