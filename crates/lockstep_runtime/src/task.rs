//! Waker-backed routine task.
//!
//! A task owns one boxed future. Its waker does not poll; waking posts a unit
//! to the bound context, and the future is polled again only when a drain
//! executes that unit.

use crate::context::{self, RoutineContext};
use crate::error::{RuntimeResult, panic_message};
use crate::unit::{Argument, UnitResult};
use crate::yield_now::{self, YieldMarker};
use futures::future::BoxFuture;
use lockstep_core::TaskId;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Wake, Waker};

/// Receives the panic message of a task that panicked while resumed
pub(crate) type PanicSink = Box<dyn Fn(String) + Send + Sync>;

pub(crate) struct RoutineTask {
    id: TaskId,
    context: Mutex<Option<Arc<RoutineContext>>>,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduled: AtomicBool,
    finished: AtomicBool,
    on_panic: Option<PanicSink>,
}

impl RoutineTask {
    pub(crate) fn new(
        id: TaskId,
        context: Arc<RoutineContext>,
        future: BoxFuture<'static, ()>,
        on_panic: Option<PanicSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            context: Mutex::new(Some(context)),
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            on_panic,
        })
    }

    fn context(&self) -> Option<Arc<RoutineContext>> {
        self.context.lock().clone()
    }

    /// Queue one poll of this task on its context.
    ///
    /// Wakes that arrive while a poll is already queued collapse into it.
    pub(crate) fn schedule(self: &Arc<Self>) -> RuntimeResult<()> {
        if self.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.scheduled.swap(true, Ordering::AcqRel) {
            self.merge_wake();
            return Ok(());
        }
        let Some(context) = self.context() else {
            return Ok(());
        };

        let task = Arc::clone(self);
        let posted = context.post_unit(
            Box::new(move |_: Argument| -> UnitResult { task.run() }),
            Box::new(()),
            true,
        );
        if posted.is_err() {
            self.scheduled.store(false, Ordering::Release);
        }
        posted.map(|_| ())
    }

    /// A wake folded into an already queued poll loses its yield marker.
    fn merge_wake(&self) -> Option<YieldMarker> {
        let marker = yield_now::take_pending();
        if let Some(marker) = marker {
            tracing::trace!(
                task = %self.id,
                version = marker.version(),
                "yield wake merged into queued poll; marker dropped"
            );
        }
        marker
    }

    /// Poll on the calling thread without catching panics.
    ///
    /// Only used for the synchronous prefix of a routine.
    pub(crate) fn poll_inline(self: &Arc<Self>) {
        let Some(context) = self.context() else {
            return;
        };
        let _guard = context::enter(context);
        self.poll_once();
    }

    fn run(self: &Arc<Self>) -> UnitResult {
        self.scheduled.store(false, Ordering::Release);
        let Some(context) = self.context() else {
            return Ok(());
        };
        let _guard = context::enter(context);

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.poll_once())) {
            let abandoned = self.future.lock().take();
            drop(abandoned);
            self.finish();

            match &self.on_panic {
                Some(sink) => sink(panic_message(payload.as_ref())),
                None => panic::resume_unwind(payload),
            }
        }
        Ok(())
    }

    fn poll_once(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        if future.as_mut().poll(&mut cx).is_ready() {
            let done = slot.take();
            drop(slot);
            drop(done);
            self.finish();
            tracing::trace!(task = %self.id, "task finished");
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        let released = self.context.lock().take();
        drop(released);
    }
}

impl Wake for RoutineTask {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Err(err) = self.schedule() {
            tracing::debug!(task = %self.id, error = %err, "dropping wake");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::yield_now::{set_pending, yield_now};
    use lockstep_core::IdAllocator;
    use std::sync::atomic::AtomicUsize;

    fn context() -> (Arc<RoutineContext>, IdAllocator) {
        let ids = IdAllocator::new();
        (
            RoutineContext::new(ids.next_routine(), ids.clone(), HostConfig::default()),
            ids,
        )
    }

    fn explode(message: &str) {
        panic!("{message}");
    }

    #[test]
    fn test_inline_poll_runs_prefix() {
        let (ctx, ids) = context();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);

        let task = RoutineTask::new(
            ids.next_task(),
            Arc::clone(&ctx),
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        );

        task.poll_inline();
        assert_eq!(polls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.scheduler().pending(), 1);
        assert!(ctx.scheduler().queue_head().unwrap().flags.is_yield_continuation);

        ctx.scheduler().drain(false).unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert!(task.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_duplicate_wakes_collapse() {
        let (ctx, ids) = context();
        let task = RoutineTask::new(ids.next_task(), Arc::clone(&ctx), Box::pin(async {}), None);

        let waker = Waker::from(Arc::clone(&task));
        waker.wake_by_ref();
        waker.wake_by_ref();
        waker.wake();
        assert_eq!(ctx.scheduler().pending(), 1);
    }

    #[test]
    fn test_merged_wake_consumes_yield_marker() {
        let (ctx, ids) = context();
        let task = RoutineTask::new(ids.next_task(), Arc::clone(&ctx), Box::pin(async {}), None);

        task.schedule().unwrap();
        set_pending(YieldMarker::CURRENT);
        task.schedule().unwrap();

        assert_eq!(yield_now::take_pending(), None);
        assert_eq!(ctx.scheduler().pending(), 1);
        assert!(!ctx.scheduler().queue_head().unwrap().flags.is_yield_continuation);
        assert_eq!(task.merge_wake(), None);
    }

    #[test]
    fn test_finished_task_releases_context() {
        let (ctx, ids) = context();
        let task = RoutineTask::new(ids.next_task(), Arc::clone(&ctx), Box::pin(async {}), None);

        task.poll_inline();
        assert!(task.context().is_none());

        Waker::from(Arc::clone(&task)).wake();
        assert_eq!(ctx.scheduler().pending(), 0);
    }

    #[test]
    fn test_panic_goes_to_sink() {
        let (ctx, ids) = context();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);

        let task = RoutineTask::new(
            ids.next_task(),
            Arc::clone(&ctx),
            Box::pin(async {
                yield_now().await;
                explode("after suspension");
            }),
            Some(Box::new(move |message: String| *slot.lock() = Some(message))),
        );

        task.poll_inline();
        ctx.scheduler().drain(false).unwrap();
        assert_eq!(seen.lock().as_deref(), Some("after suspension"));
        assert!(task.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_without_sink_fails_unit() {
        let (ctx, ids) = context();
        let task = RoutineTask::new(
            ids.next_task(),
            Arc::clone(&ctx),
            Box::pin(async {
                yield_now().await;
                explode("detached");
            }),
            None,
        );

        task.poll_inline();
        let err = ctx.scheduler().drain(false).unwrap_err();
        assert!(err.to_string().contains("detached"));
    }
}
