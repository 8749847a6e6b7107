//! Identifiers for LOCKSTEP entities.
//!
//! Ids are plain monotonic counters. They are handed out by an
//! [`IdAllocator`] that the caller owns and passes around explicitly, so two
//! hosts (or two tests) never share a hidden counter.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
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
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Routine identifier - one per started routine
    RoutineId,
    "routine"
);
counter_id!(
    /// Scheduler identifier - one per routine scheduler
    SchedulerId,
    "sched"
);
counter_id!(
    /// Work unit identifier - one per intercepted continuation
    UnitId,
    "unit"
);
counter_id!(
    /// Task identifier - one per pollable future bound to a context
    TaskId,
    "task"
);

#[derive(Debug, Default)]
struct Counters {
    routine: AtomicU64,
    scheduler: AtomicU64,
    unit: AtomicU64,
    task: AtomicU64,
}

/// Monotonic id allocator.
///
/// Cloning shares the underlying counters. Ids start at 1 so that a zeroed
/// id never collides with a real one.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: Arc<Counters>,
}

impl IdAllocator {
    /// Create a fresh allocator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Allocate a routine id
    pub fn next_routine(&self) -> RoutineId {
        RoutineId(Self::bump(&self.counters.routine))
    }

    /// Allocate a scheduler id
    pub fn next_scheduler(&self) -> SchedulerId {
        SchedulerId(Self::bump(&self.counters.scheduler))
    }

    /// Allocate a work unit id
    pub fn next_unit(&self) -> UnitId {
        UnitId(Self::bump(&self.counters.unit))
    }

    /// Allocate a task id
    pub fn next_task(&self) -> TaskId {
        TaskId(Self::bump(&self.counters.task))
    }

    /// Number of work unit ids handed out so far
    #[must_use]
    pub fn units_allocated(&self) -> u64 {
        self.counters.unit.load(Ordering::Relaxed)
    }

    /// Whether two allocators share the same counters
    #[must_use]
    pub fn shares_counters_with(&self, other: &IdAllocator) -> bool {
        Arc::ptr_eq(&self.counters, &other.counters)
    }
}
