//! LOCKSTEP Core Types
//!
//! Pure types shared by the runtime and the simulation harness.
//! Nothing in here performs I/O or spawns threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{IdAllocator, RoutineId, SchedulerId, TaskId, UnitId};
pub use time::LogicalTime;
