//! Unit executor.
//!
//! Runs exactly one work unit on a worker thread and blocks the caller until
//! it is done. The worker is never the draining thread, so a unit can never
//! observe the drain that is running it on its own stack.

use crate::context::{self, RoutineContext};
use crate::error::{UnitFailure, panic_message};
use crate::unit::WorkUnit;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Handle;

/// Executes single work units off the calling thread
#[derive(Debug, Clone)]
pub struct UnitExecutor {
    worker_name: String,
}

impl UnitExecutor {
    /// Create an executor whose worker threads carry `worker_name`
    #[must_use]
    pub fn new(worker_name: impl Into<String>) -> Self {
        Self {
            worker_name: worker_name.into(),
        }
    }

    /// Worker thread name
    #[must_use]
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Run `unit` to completion on a worker thread.
    ///
    /// Unless the unit installs the routine context itself, `context` is
    /// installed around the callback. When `runtime` is given, the worker
    /// enters it first, so timers and I/O created by the unit register with
    /// the host's reactor. Panics are caught and reported as failures; they
    /// never cross into the caller.
    ///
    /// # Errors
    ///
    /// Returns the failure of the callback, or `WorkerUnavailable` if no
    /// thread could be started
    pub fn execute(
        &self,
        unit: WorkUnit,
        context: Option<&Arc<RoutineContext>>,
        runtime: Option<&Handle>,
    ) -> Result<(), UnitFailure> {
        let id = unit.id();
        let install = if unit.can_self_install_context() {
            None
        } else {
            context.cloned()
        };
        let runtime = runtime.cloned();

        let worker = thread::Builder::new()
            .name(self.worker_name.clone())
            .spawn(move || {
                let _runtime = runtime.as_ref().map(Handle::enter);
                let _guard = install.map(context::enter);
                panic::catch_unwind(AssertUnwindSafe(|| unit.run()))
            })
            .map_err(|err| UnitFailure::WorkerUnavailable {
                unit: id,
                message: err.to_string(),
            })?;

        match worker.join() {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(UnitFailure::Failed {
                unit: id,
                message: err.to_string(),
            }),
            Ok(Err(payload)) | Err(payload) => Err(UnitFailure::Panicked {
                unit: id,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl Default for UnitExecutor {
    fn default() -> Self {
        Self::new("lockstep-worker")
    }
}
