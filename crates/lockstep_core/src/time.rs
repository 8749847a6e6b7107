//! Logical time for LOCKSTEP.
//!
//! Schedulers advance logical time by one tick per executed work unit.
//! Wall clock time never drives ordering.

use serde::{Deserialize, Serialize};

/// Logical time - monotonically increasing counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// Create a new logical time at zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Advance by one tick, saturating at `u64::MAX`
    pub fn tick(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Create time advanced by `n` ticks
    #[must_use]
    pub const fn saturating_add(&self, n: u64) -> Self {
        Self(self.0.saturating_add(n))
    }

    /// Ticks elapsed since an earlier time (zero if `earlier` is later)
    #[must_use]
    pub const fn since(&self, earlier: LogicalTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Default for LogicalTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl From<u64> for LogicalTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
