//! Scheduler metrics.
//!
//! Counters are updated by the scheduler as units are queued and drained.
//! Logical time advances by one tick per executed unit.

use lockstep_core::LogicalTime;
use serde::{Deserialize, Serialize};

/// Per-scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Units accepted into the queue
    pub units_queued: u64,
    /// Units executed (successfully or not)
    pub units_executed: u64,
    /// Units whose callback failed or panicked
    pub units_failed: u64,
    /// Units rejected because the scheduler was closed
    pub units_rejected: u64,
    /// Units discarded by `close`
    pub units_discarded: u64,
    /// Drain calls
    pub drains: u64,
    /// Drains that stopped at a yield boundary
    pub yield_stops: u64,
    /// One tick per executed unit
    pub logical_time: LogicalTime,
}

impl SchedulerMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted unit
    pub fn record_queued(&mut self) {
        self.units_queued += 1;
    }

    /// Record an executed unit
    pub fn record_execution(&mut self, failed: bool) {
        self.units_executed += 1;
        if failed {
            self.units_failed += 1;
        }
        self.logical_time.tick();
    }

    /// Record a rejected unit
    pub fn record_rejected(&mut self) {
        self.units_rejected += 1;
    }

    /// Record units dropped by close
    pub fn record_discarded(&mut self, count: usize) {
        self.units_discarded += count as u64;
    }

    /// Record a drain call
    pub fn record_drain(&mut self, stopped_at_yield: bool) {
        self.drains += 1;
        if stopped_at_yield {
            self.yield_stops += 1;
        }
    }

    /// Units queued but not yet executed or discarded
    #[must_use]
    pub fn backlog(&self) -> u64 {
        self.units_queued
            .saturating_sub(self.units_executed)
            .saturating_sub(self.units_discarded)
    }

    /// Failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.units_executed == 0 {
            return 0.0;
        }
        self.units_failed as f64 / self.units_executed as f64
    }
}
