//! LOCKSTEP Runtime
//!
//! Host-driven execution of async routines, one continuation at a time.
//!
//! A routine is an ordinary `Future`. It is polled with a waker owned by this
//! crate, so every wake becomes a [`WorkUnit`] on the routine's own
//! [`ContinuationQueue`] instead of being run by a thread pool. Nothing polls
//! the routine again until the host calls one of the pump methods on its
//! [`RoutineHandle`].
//!
//! ```no_run
//! use lockstep_runtime::{HostConfig, RoutineHost, yield_now};
//!
//! let host = RoutineHost::new(HostConfig::default()).unwrap();
//! let handle = host.start_fn(|| async {
//!     yield_now().await;
//!     Ok(42)
//! });
//!
//! handle.pump(true).unwrap();
//! assert_eq!(handle.outcome().and_then(|o| o.into_value()), Some(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod handle;
pub mod host;
pub mod monitor;
pub mod queue;
pub mod scheduler;
mod task;
pub mod unit;
pub mod yield_now;

pub use completion::Outcome;
pub use config::{Backoff, HostConfig, QuiescenceConfig};
pub use context::{RoutineContext, spawn};
pub use error::{
    ContinuationFailure, RoutineError, RoutineFault, RuntimeError, RuntimeResult, UnitFailure,
};
pub use executor::UnitExecutor;
pub use handle::{HandleState, QuiescenceReport, RoutineHandle, RunMode, RunStatus};
pub use host::RoutineHost;
pub use monitor::SchedulerMetrics;
pub use queue::ContinuationQueue;
pub use scheduler::{DrainReport, RoutineScheduler};
pub use unit::{Argument, BoxError, Callback, UnitFlags, UnitInfo, UnitResult, WorkUnit};
pub use yield_now::{YieldMarker, YieldNow, yield_now, yield_with_marker};

pub use tokio_util::sync::CancellationToken;
