//! Routine context: where every resumption of a routine enters the runtime.
//!
//! Each context owns exactly one [`RoutineScheduler`]. Wakes of tasks bound to
//! the context are turned into work units and queued on that scheduler; they
//! never run on the thread that issued the wake.

use crate::config::HostConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::RoutineScheduler;
use crate::task::RoutineTask;
use crate::unit::{Argument, Callback, UnitFlags, UnitResult, WorkUnit};
use crate::yield_now::{self, YieldMarker};
use lockstep_core::{IdAllocator, RoutineId, SchedulerId, TaskId, UnitId};
use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<Arc<RoutineContext>>> = const { RefCell::new(None) };
}

/// Restores the previously installed context when dropped
pub(crate) struct ContextGuard {
    previous: Option<Arc<RoutineContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Install `context` as the ambient context of this thread
pub(crate) fn enter(context: Arc<RoutineContext>) -> ContextGuard {
    let previous = CURRENT.with(|current| current.borrow_mut().replace(context));
    ContextGuard { previous }
}

/// Scheduler of the context installed on this thread, if any
pub(crate) fn current_scheduler_id() -> Option<SchedulerId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|ctx| ctx.scheduler.id()))
}

/// Continuation-interception surface bound to one scheduler
pub struct RoutineContext {
    routine: RoutineId,
    scheduler: Arc<RoutineScheduler>,
    ids: IdAllocator,
    config: HostConfig,
}

impl RoutineContext {
    /// Create a context together with its scheduler
    #[must_use]
    pub fn new(routine: RoutineId, ids: IdAllocator, config: HostConfig) -> Arc<Self> {
        let scheduler_id = ids.next_scheduler();
        Arc::new_cyclic(|weak| Self {
            routine,
            scheduler: Arc::new(RoutineScheduler::new(scheduler_id, weak.clone(), &config)),
            ids,
            config,
        })
    }

    /// Context installed on the current thread.
    ///
    /// Set while a work unit of some routine runs, and during the inline
    /// prefix of `start`.
    #[must_use]
    pub fn current() -> Option<Arc<Self>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Routine this context belongs to
    #[must_use]
    pub const fn routine_id(&self) -> RoutineId {
        self.routine
    }

    /// The bound scheduler
    #[must_use]
    pub fn scheduler(&self) -> &Arc<RoutineScheduler> {
        &self.scheduler
    }

    /// Synchronous dispatch. Always rejected.
    ///
    /// Running the callback here would execute routine logic on whatever
    /// thread happens to call `send`, outside the host's control.
    ///
    /// # Errors
    ///
    /// Always returns `UnsupportedOperation`
    pub fn send<F>(&self, _callback: F, _argument: Argument) -> RuntimeResult<()>
    where
        F: FnOnce(Argument) -> UnitResult + Send + 'static,
    {
        Err(RuntimeError::UnsupportedOperation {
            operation: "synchronous dispatch on a routine context".to_string(),
        })
    }

    /// Queue `callback(argument)` on the bound scheduler.
    ///
    /// The callback runs during a later drain, with this context installed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the scheduler has been closed
    pub fn post<F>(&self, callback: F, argument: Argument) -> RuntimeResult<UnitId>
    where
        F: FnOnce(Argument) -> UnitResult + Send + 'static,
    {
        self.post_unit(Box::new(callback), argument, false)
    }

    pub(crate) fn post_unit(
        &self,
        callback: Callback,
        argument: Argument,
        can_self_install_context: bool,
    ) -> RuntimeResult<UnitId> {
        let flags = UnitFlags {
            can_self_install_context,
            is_yield_continuation: Self::is_yield_continuation(yield_now::take_pending()),
        };
        let id = self.ids.next_unit();
        let unit = WorkUnit::new(id, self.scheduler.id(), flags, callback, argument);

        tracing::trace!(
            routine = %self.routine,
            scheduler = %self.scheduler.id(),
            unit = %id,
            is_yield = flags.is_yield_continuation,
            "posting continuation"
        );
        self.scheduler.queue(unit)?;
        Ok(id)
    }

    /// Yield predicate: only markers of a recognized version count
    #[must_use]
    pub fn is_yield_continuation(marker: Option<YieldMarker>) -> bool {
        match marker {
            None => false,
            Some(marker) if marker.is_recognized() => true,
            Some(marker) => {
                tracing::warn!(
                    version = marker.version(),
                    "unrecognized yield marker, treating wake as an ordinary continuation"
                );
                false
            }
        }
    }

    /// Spawn a detached task bound to this context.
    ///
    /// The task is not polled here; its first poll is queued like any other
    /// continuation. Work it produces after the main routine has finished is
    /// picked up by `drain_remaining_work`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the scheduler has been closed
    pub fn spawn<F>(self: &Arc<Self>, future: F) -> RuntimeResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.ids.next_task();
        let task = RoutineTask::new(id, Arc::clone(self), Box::pin(future), None);
        task.schedule()?;
        tracing::debug!(routine = %self.routine, task = %id, "spawned detached task");
        Ok(id)
    }

    /// Produce a distinct context with its own scheduler.
    ///
    /// Nothing queued here is shared with the fork. If the host copies a
    /// context while the routine is mid-flight, continuations posted to the
    /// fork will never be drained through the original handle.
    #[must_use]
    pub fn fork(&self) -> Arc<Self> {
        let forked = Self::new(self.routine, self.ids.clone(), self.config.clone());
        tracing::warn!(
            routine = %self.routine,
            from = %self.scheduler.id(),
            to = %forked.scheduler.id(),
            "routine context forked"
        );
        forked
    }
}

impl std::fmt::Debug for RoutineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineContext")
            .field("routine", &self.routine)
            .field("scheduler", &self.scheduler.id())
            .finish_non_exhaustive()
    }
}

/// Spawn a detached task on the context of the running routine
///
/// # Errors
///
/// Returns `InvalidState` when called outside a routine, or if the routine's
/// scheduler has been closed
pub fn spawn<F>(future: F) -> RuntimeResult<TaskId>
where
    F: Future<Output = ()> + Send + 'static,
{
    let context = RoutineContext::current()
        .ok_or_else(|| RuntimeError::invalid_state("spawn called outside of a routine"))?;
    context.spawn(future)
}
