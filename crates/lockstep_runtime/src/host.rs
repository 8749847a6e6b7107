//! Routine host: the entry point for starting routines.

use crate::completion::{CompletionCell, Outcome};
use crate::config::HostConfig;
use crate::context::{self, RoutineContext};
use crate::error::{RoutineError, RoutineFault};
use crate::handle::RoutineHandle;
use crate::task::{PanicSink, RoutineTask};
use lockstep_core::{CoreResult, IdAllocator};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Starts routines, each under its own context and scheduler.
///
/// Every routine started by one host draws its ids from the host's
/// allocator.
#[derive(Debug, Clone)]
pub struct RoutineHost {
    config: HostConfig,
    ids: IdAllocator,
}

impl RoutineHost {
    /// Create a host with a fresh id allocator
    ///
    /// # Errors
    ///
    /// Returns a validation error if `config` is inconsistent
    pub fn new(config: HostConfig) -> CoreResult<Self> {
        Self::with_ids(config, IdAllocator::new())
    }

    /// Create a host drawing ids from `ids`
    ///
    /// # Errors
    ///
    /// Returns a validation error if `config` is inconsistent
    pub fn with_ids(config: HostConfig, ids: IdAllocator) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { config, ids })
    }

    /// Host configuration
    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Id allocator shared by this host's routines
    #[must_use]
    pub const fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Start `routine_fn(arg, cancel)` under a fresh context.
    ///
    /// If `cancel` is already cancelled, returns a settled, cancelled handle
    /// without calling `routine_fn`. Otherwise the routine runs on the
    /// calling thread until its first suspension; a panic in that prefix
    /// propagates to the caller. Everything after the first suspension runs
    /// only when the host pumps the returned handle.
    pub fn start<A, R, F, Fut>(
        &self,
        routine_fn: F,
        arg: A,
        cancel: CancellationToken,
    ) -> RoutineHandle<R>
    where
        F: FnOnce(A, CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, RoutineError>> + Send + 'static,
        R: Send + 'static,
    {
        let routine = self.ids.next_routine();
        let span = tracing::debug_span!("start", routine = %routine);
        let _enter = span.enter();

        if cancel.is_cancelled() {
            tracing::debug!("cancelled before start");
            return RoutineHandle::cancelled(routine, self.config.quiescence.clone());
        }

        let context = RoutineContext::new(routine, self.ids.clone(), self.config.clone());
        let completion = Arc::new(CompletionCell::new());
        let handle = RoutineHandle::new(
            routine,
            Arc::clone(&context),
            Arc::clone(&completion),
            self.config.quiescence.clone(),
        );

        let body = {
            let _guard = context::enter(Arc::clone(&context));
            routine_fn(arg, cancel)
        };

        let settle = Arc::clone(&completion);
        let root = async move {
            let outcome = match body.await {
                Ok(value) => Outcome::Completed(value),
                Err(RoutineError::Cancelled) => Outcome::Cancelled,
                Err(RoutineError::Failed(message)) => {
                    Outcome::Faulted(RoutineFault::Failed(message))
                }
            };
            settle.settle(outcome);
        };
        let on_panic: PanicSink = Box::new(move |message: String| {
            completion.settle(Outcome::Faulted(RoutineFault::Panicked(message)));
        });

        let task = RoutineTask::new(self.ids.next_task(), context, Box::pin(root), Some(on_panic));
        task.poll_inline();
        handle.mark_started();

        tracing::debug!(
            settled = handle.is_completed(),
            pending = handle.pending_units(),
            "routine started"
        );
        handle
    }

    /// Start a single-argument routine that ignores cancellation
    pub fn start_with<A, R, F, Fut>(&self, routine_fn: F, arg: A) -> RoutineHandle<R>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<R, RoutineError>> + Send + 'static,
        R: Send + 'static,
    {
        self.start(move |arg, _| routine_fn(arg), arg, CancellationToken::new())
    }

    /// Start a parameterless routine
    pub fn start_fn<R, F, Fut>(&self, routine_fn: F) -> RoutineHandle<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, RoutineError>> + Send + 'static,
        R: Send + 'static,
    {
        self.start(move |(), _| routine_fn(), (), CancellationToken::new())
    }

    /// Start a plain closure as a routine.
    ///
    /// The closure runs inline during this call.
    pub fn start_action<F>(&self, action: F) -> RoutineHandle<()>
    where
        F: FnOnce() -> Result<(), RoutineError> + Send + 'static,
    {
        self.start(move |(), _| async move { action() }, (), CancellationToken::new())
    }
}
