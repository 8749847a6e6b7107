//! Host-facing handle of a started routine.
//!
//! The handle holds the routine's context strongly while the routine is
//! running. Once the routine has settled and the host asks for the remaining
//! work to be drained, the handle keeps only a weak reference: the context
//! then lives exactly as long as some task, queued unit, or stored waker can
//! still post to it.

use crate::completion::{CompletionCell, Outcome};
use crate::config::QuiescenceConfig;
use crate::context::RoutineContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::monitor::SchedulerMetrics;
use crate::scheduler::{DrainReport, RoutineScheduler};
use lockstep_core::RoutineId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Lifecycle of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleState {
    /// Inside `start`, before the first suspension
    Starting,
    /// Running; the completion has not settled
    Active,
    /// Settled; work may still be queued or producible
    Settled,
    /// Nothing can post to the routine any more
    Quiesced,
}

/// Where `run_to_completion` runs its pump loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    /// On the calling task
    #[default]
    Inline,
    /// On a blocking thread of the tokio runtime
    Background,
}

/// How `run_to_completion` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// The completion settled
    Completed,
    /// The loop observed cancellation first
    Cancelled,
}

/// Result of `drain_remaining_work`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiescenceReport {
    /// Drain attempts made
    pub attempts: u32,
    /// Units executed across all attempts
    pub units_executed: usize,
    /// Whether the routine became unreachable
    pub quiesced: bool,
}

enum Binding {
    Strong(Arc<RoutineContext>),
    Weak(Weak<RoutineContext>),
}

impl Binding {
    fn resolve(&self) -> Option<Arc<RoutineContext>> {
        match self {
            Self::Strong(context) => Some(Arc::clone(context)),
            Self::Weak(context) => context.upgrade(),
        }
    }

    fn release(&mut self) {
        if let Self::Strong(context) = self {
            *self = Self::Weak(Arc::downgrade(context));
        }
    }

    fn is_unreachable(&self) -> bool {
        matches!(self, Self::Weak(context) if context.strong_count() == 0)
    }
}

struct HandleInner<R> {
    routine: RoutineId,
    binding: Mutex<Binding>,
    completion: Arc<CompletionCell<R>>,
    started: AtomicBool,
    quiescence: QuiescenceConfig,
}

impl<R> Drop for HandleInner<R> {
    fn drop(&mut self) {
        if let Some(context) = self.binding.get_mut().resolve() {
            let discarded = context.scheduler().close();
            tracing::debug!(routine = %self.routine, discarded, "last handle dropped");
        }
    }
}

/// Handle to a routine started by [`RoutineHost`](crate::RoutineHost).
///
/// Clones share the routine. Dropping the last clone closes the routine's
/// scheduler: queued units are discarded and further posts are rejected.
pub struct RoutineHandle<R> {
    inner: Arc<HandleInner<R>>,
}

impl<R> Clone for RoutineHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> RoutineHandle<R> {
    pub(crate) fn new(
        routine: RoutineId,
        context: Arc<RoutineContext>,
        completion: Arc<CompletionCell<R>>,
        quiescence: QuiescenceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                routine,
                binding: Mutex::new(Binding::Strong(context)),
                completion,
                started: AtomicBool::new(false),
                quiescence,
            }),
        }
    }

    pub(crate) fn cancelled(routine: RoutineId, quiescence: QuiescenceConfig) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                routine,
                binding: Mutex::new(Binding::Weak(Weak::new())),
                completion: Arc::new(CompletionCell::settled(Outcome::Cancelled)),
                started: AtomicBool::new(true),
                quiescence,
            }),
        }
    }

    pub(crate) fn mark_started(&self) {
        self.inner.started.store(true, Ordering::Release);
    }

    /// Routine id
    #[must_use]
    pub fn routine_id(&self) -> RoutineId {
        self.inner.routine
    }

    /// Whether the completion has settled
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.completion.is_settled()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> HandleState {
        if self.inner.binding.lock().is_unreachable() {
            HandleState::Quiesced
        } else if self.is_completed() {
            HandleState::Settled
        } else if self.inner.started.load(Ordering::Acquire) {
            HandleState::Active
        } else {
            HandleState::Starting
        }
    }

    /// Whether nothing can post to the routine any more
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        self.state() == HandleState::Quiesced
    }

    fn scheduler(&self) -> Option<Arc<RoutineScheduler>> {
        let context = self.inner.binding.lock().resolve()?;
        Some(Arc::clone(context.scheduler()))
    }

    /// Units waiting on the routine's scheduler
    #[must_use]
    pub fn pending_units(&self) -> usize {
        self.scheduler().map_or(0, |scheduler| scheduler.pending())
    }

    /// Scheduler metrics, while the routine is reachable and metrics are on
    #[must_use]
    pub fn metrics(&self) -> Option<SchedulerMetrics> {
        self.scheduler().and_then(|scheduler| scheduler.metrics())
    }

    /// Run one drain of the routine's scheduler.
    ///
    /// Does nothing once the routine is unreachable.
    ///
    /// # Errors
    ///
    /// Returns the failures of units executed by this call
    pub fn pump(&self, break_on_yield: bool) -> RuntimeResult<DrainReport> {
        match self.scheduler() {
            Some(scheduler) => scheduler.drain(break_on_yield),
            None => Ok(DrainReport::default()),
        }
    }

    /// Resolve once at least one unit is queued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the routine has quiesced
    pub async fn when_work_queued(&self) -> RuntimeResult<()> {
        let signal = self
            .scheduler()
            .map(|scheduler| scheduler.when_non_empty())
            .ok_or_else(|| {
                RuntimeError::invalid_state(format!("routine {} has quiesced", self.inner.routine))
            })?;
        signal.await;
        Ok(())
    }

    /// Wait for work, then pump once
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the routine has quiesced, or the failures of
    /// the units executed
    pub async fn pump_when_ready(&self, break_on_yield: bool) -> RuntimeResult<DrainReport> {
        self.when_work_queued().await?;
        self.pump(break_on_yield)
    }

    async fn drive(&self, cancel: &CancellationToken) -> RuntimeResult<RunStatus> {
        loop {
            if self.is_completed() {
                return Ok(RunStatus::Completed);
            }
            if cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(RunStatus::Cancelled),
                () = self.inner.completion.wait_settled() => return Ok(RunStatus::Completed),
                ready = self.when_work_queued() => ready?,
            }
            self.pump(false)?;
        }
    }

    /// Drain the scheduler until the completion settles or `cancel` fires.
    ///
    /// `Background` runs the loop on a blocking thread and needs a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns the first drain failure, or `Background` if the background
    /// loop could not be joined
    pub async fn run_to_completion(
        &self,
        mode: RunMode,
        cancel: CancellationToken,
    ) -> RuntimeResult<RunStatus>
    where
        R: Send + 'static,
    {
        let span = tracing::debug_span!("run_to_completion", routine = %self.inner.routine, ?mode);

        match mode {
            RunMode::Inline => self.drive(&cancel).instrument(span).await,
            RunMode::Background => {
                let handle = self.clone();
                tokio::task::spawn_blocking(move || {
                    futures::executor::block_on(handle.drive(&cancel).instrument(span))
                })
                .await
                .map_err(|err| RuntimeError::Background {
                    message: err.to_string(),
                })?
            }
        }
    }

    /// Drain work left behind by a settled routine until nothing can post.
    ///
    /// Releases the handle's strong reference to the routine first. Each
    /// attempt drains once, then waits for new work or the next backoff
    /// delay. Resolves the first time the routine is found unreachable, or
    /// with `quiesced == false` if `cancel` fires first. Needs a tokio
    /// runtime with timers enabled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the routine has not settled or the attempt
    /// limit is exhausted, and the failures of any unit it executes
    pub async fn drain_remaining_work(
        &self,
        cancel: CancellationToken,
    ) -> RuntimeResult<QuiescenceReport> {
        let routine = self.inner.routine;
        if !self.is_completed() {
            return Err(RuntimeError::invalid_state(format!(
                "routine {routine} has not settled"
            )));
        }
        self.inner.binding.lock().release();

        let config = &self.inner.quiescence;
        let mut backoff = config.backoff();
        let mut report = QuiescenceReport::default();

        loop {
            let Some(scheduler) = self.scheduler() else {
                report.quiesced = true;
                tracing::debug!(
                    routine = %routine,
                    attempts = report.attempts,
                    units = report.units_executed,
                    "routine quiesced"
                );
                return Ok(report);
            };
            if cancel.is_cancelled() {
                return Ok(report);
            }
            if config.max_attempts > 0 && report.attempts >= config.max_attempts {
                return Err(RuntimeError::invalid_state(format!(
                    "routine {routine} still reachable after {} drain attempts",
                    report.attempts
                )));
            }

            report.attempts += 1;
            let drained = {
                let scheduler = Arc::clone(&scheduler);
                tokio::task::spawn_blocking(move || scheduler.drain(false))
                    .await
                    .map_err(|err| RuntimeError::Background {
                        message: err.to_string(),
                    })??
            };
            report.units_executed += drained.executed;
            if drained.executed > 0 {
                backoff = config.backoff();
            }

            let work = scheduler.when_non_empty();
            drop(scheduler);
            let delay = backoff
                .next()
                .unwrap_or(Duration::from_millis(config.max_backoff_ms));
            tracing::trace!(routine = %routine, ?delay, "waiting for remaining work");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(report),
                () = work => {}
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl<R: Clone + Send + 'static> RoutineHandle<R> {
    /// Future resolving to the settled outcome
    pub fn completion(&self) -> impl Future<Output = Outcome<R>> + Send + use<R> {
        let cell = Arc::clone(&self.inner.completion);
        async move { cell.wait().await }
    }

    /// The settled outcome, if any
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<R>> {
        self.inner.completion.outcome()
    }
}

impl<R> std::fmt::Debug for RoutineHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineHandle")
            .field("routine", &self.inner.routine)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
