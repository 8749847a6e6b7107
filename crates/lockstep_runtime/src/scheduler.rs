//! Routine scheduler.
//!
//! One scheduler per routine, concurrency fixed at one:
//! - queueing never runs anything
//! - only `drain` executes units, one at a time, in FIFO order
//! - concurrent drains of the same scheduler are serialized

use crate::config::HostConfig;
use crate::context::{self, RoutineContext};
use crate::error::{ContinuationFailure, RuntimeError, RuntimeResult};
use crate::executor::UnitExecutor;
use crate::monitor::SchedulerMetrics;
use crate::queue::ContinuationQueue;
use crate::unit::{UnitInfo, WorkUnit};
use lockstep_core::SchedulerId;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;

/// Result of one drain call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Units executed by this call
    pub executed: usize,
    /// Whether the call stopped in front of a yield continuation
    pub stopped_at_yield: bool,
    /// Units still queued when the call returned
    pub remaining: usize,
}

/// Single-concurrency executor bound to one routine
pub struct RoutineScheduler {
    id: SchedulerId,
    queue: ContinuationQueue,
    drain_guard: Mutex<()>,
    closed: AtomicBool,
    executor: UnitExecutor,
    context: Weak<RoutineContext>,
    runtime: Option<Handle>,
    metrics: Option<Mutex<SchedulerMetrics>>,
}

impl RoutineScheduler {
    /// Maximum number of units executing at once
    pub const MAX_CONCURRENCY: usize = 1;

    pub(crate) fn new(id: SchedulerId, context: Weak<RoutineContext>, config: &HostConfig) -> Self {
        Self {
            id,
            queue: ContinuationQueue::new(),
            drain_guard: Mutex::new(()),
            closed: AtomicBool::new(false),
            executor: UnitExecutor::new(format!("{}-{}", config.worker_name_prefix, id)),
            context,
            runtime: Handle::try_current().ok(),
            metrics: config
                .metrics_enabled
                .then(|| Mutex::new(SchedulerMetrics::new())),
        }
    }

    /// Scheduler id
    #[must_use]
    pub const fn id(&self) -> SchedulerId {
        self.id
    }

    fn record(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        if let Some(metrics) = &self.metrics {
            f(&mut metrics.lock());
        }
    }

    /// Append a unit to the queue.
    ///
    /// Never runs the unit, even if nothing else is pending.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the scheduler is closed or the unit was
    /// created for another scheduler
    pub fn queue(&self, unit: WorkUnit) -> RuntimeResult<()> {
        if unit.scheduler() != self.id {
            return Err(RuntimeError::invalid_state(format!(
                "unit {} belongs to {}, not {}",
                unit.id(),
                unit.scheduler(),
                self.id
            )));
        }
        if self.is_closed() {
            self.record(SchedulerMetrics::record_rejected);
            tracing::warn!(
                scheduler = %self.id,
                unit = %unit.id(),
                "rejecting unit on closed scheduler"
            );
            return Err(RuntimeError::invalid_state(format!(
                "scheduler {} is closed",
                self.id
            )));
        }

        self.queue.enqueue(unit);
        self.record(SchedulerMetrics::record_queued);
        Ok(())
    }

    /// Execute queued units one at a time.
    ///
    /// Each unit runs on a worker thread while this thread blocks. The
    /// worker enters the tokio runtime current at this call, falling back to
    /// the one current when the scheduler was created. With
    /// `break_on_yield`, the call stops as soon as the next queued unit is a
    /// yield continuation, leaving it queued. Failures do not stop the loop;
    /// they are collected and returned together at the end.
    ///
    /// # Errors
    ///
    /// Returns `Continuation` with the failures of this call, or
    /// `InvalidState` when called from inside one of this scheduler's units
    pub fn drain(&self, break_on_yield: bool) -> RuntimeResult<DrainReport> {
        if context::current_scheduler_id() == Some(self.id) {
            return Err(RuntimeError::invalid_state(format!(
                "drain of {} called from inside one of its own units",
                self.id
            )));
        }

        let _guard = self.drain_guard.lock();
        let span = tracing::debug_span!("drain", scheduler = %self.id, break_on_yield);
        let _enter = span.enter();

        let context = self.context.upgrade();
        let runtime = Handle::try_current().ok().or_else(|| self.runtime.clone());
        let mut report = DrainReport::default();
        let mut failures = Vec::new();

        while let Some(unit) = self.queue.try_dequeue() {
            let id = unit.id();
            tracing::trace!(unit = %id, "executing unit");

            let result = self
                .executor
                .execute(unit, context.as_ref(), runtime.as_ref());
            self.record(|m| m.record_execution(result.is_err()));
            report.executed += 1;
            if let Err(failure) = result {
                tracing::debug!(unit = %id, error = %failure, "unit failed");
                failures.push(failure);
            }

            if break_on_yield
                && self
                    .queue
                    .try_peek()
                    .is_some_and(|head| head.flags.is_yield_continuation)
            {
                report.stopped_at_yield = true;
                break;
            }
        }

        report.remaining = self.queue.len();
        self.record(|m| m.record_drain(report.stopped_at_yield));
        tracing::debug!(
            executed = report.executed,
            remaining = report.remaining,
            stopped_at_yield = report.stopped_at_yield,
            failures = failures.len(),
            "drain finished"
        );

        match ContinuationFailure::from_failures(failures) {
            None => Ok(report),
            Some(failure) => Err(failure.into()),
        }
    }

    /// Future resolving once at least one unit is queued
    pub fn when_non_empty(&self) -> impl Future<Output = ()> + Send + use<> {
        self.queue.when_non_empty()
    }

    /// Number of queued units
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Metadata of the next unit to run
    #[must_use]
    pub fn queue_head(&self) -> Option<UnitInfo> {
        self.queue.try_peek()
    }

    /// Best-effort view of the queue for diagnostics.
    ///
    /// Never blocks; returns `None` if the queue is busy.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<UnitInfo>> {
        self.queue.try_snapshot()
    }

    /// Discard queued units and refuse new ones.
    ///
    /// Returns the number of units discarded.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let discarded = self.queue.clear();
        self.record(|m| m.record_discarded(discarded));
        tracing::debug!(scheduler = %self.id, discarded, "scheduler closed");
        discarded
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Metrics snapshot (`None` when metrics are disabled)
    #[must_use]
    pub fn metrics(&self) -> Option<SchedulerMetrics> {
        self.metrics.as_ref().map(|m| m.lock().clone())
    }
}

impl std::fmt::Debug for RoutineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineScheduler")
            .field("id", &self.id)
            .field("pending", &self.queue.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
