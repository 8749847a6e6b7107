//! FIFO continuation queue with a "became non-empty" signal.

use crate::unit::{UnitInfo, WorkUnit};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-shot signal raised when the queue goes from empty to non-empty.
///
/// Every waiter that grabbed the same signal observes the same raise. The
/// queue swaps in a fresh signal whenever it drains back to empty.
#[derive(Debug, Default)]
struct NonEmptySignal {
    raised: AtomicBool,
    notify: Notify,
}

impl NonEmptySignal {
    fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    async fn wait(self: Arc<Self>) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a raise in between is not lost.
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    units: VecDeque<WorkUnit>,
    signal: Arc<NonEmptySignal>,
}

/// FIFO queue of pending work units.
///
/// All mutation goes through one lock. Units are always removed from the
/// queue before they are dropped or run, so no callback or destructor runs
/// while the lock is held.
#[derive(Debug, Default)]
pub struct ContinuationQueue {
    state: Mutex<QueueState>,
}

impl ContinuationQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit at the tail
    pub fn enqueue(&self, unit: WorkUnit) {
        let raise = {
            let mut state = self.state.lock();
            state.units.push_back(unit);
            (state.units.len() == 1).then(|| Arc::clone(&state.signal))
        };
        if let Some(signal) = raise {
            signal.raise();
        }
    }

    /// Remove and return the head unit
    pub fn try_dequeue(&self) -> Option<WorkUnit> {
        let mut state = self.state.lock();
        let unit = state.units.pop_front()?;
        if state.units.is_empty() {
            state.signal = Arc::default();
        }
        Some(unit)
    }

    /// Metadata of the head unit, leaving it queued
    #[must_use]
    pub fn try_peek(&self) -> Option<UnitInfo> {
        self.state.lock().units.front().map(WorkUnit::info)
    }

    /// Number of queued units
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().units.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Future that resolves once the queue holds at least one unit.
    ///
    /// Resolves immediately if the queue is already non-empty. The returned
    /// future does not borrow the queue.
    pub fn when_non_empty(&self) -> impl Future<Output = ()> + Send + use<> {
        let signal = Arc::clone(&self.state.lock().signal);
        signal.wait()
    }

    /// Metadata of every queued unit without blocking.
    ///
    /// Returns `None` if the lock is currently held elsewhere.
    #[must_use]
    pub fn try_snapshot(&self) -> Option<Vec<UnitInfo>> {
        let state = self.state.try_lock()?;
        Some(state.units.iter().map(WorkUnit::info).collect())
    }

    /// Remove every queued unit, returning how many were dropped
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            state.signal = Arc::default();
            std::mem::take(&mut state.units)
        };
        dropped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Argument, UnitFlags, UnitResult, no_argument};
    use futures::FutureExt;
    use lockstep_core::{SchedulerId, UnitId};

    fn unit(id: u64, is_yield: bool) -> WorkUnit {
        WorkUnit::new(
            UnitId::from_raw(id),
            SchedulerId::from_raw(1),
            UnitFlags {
                can_self_install_context: false,
                is_yield_continuation: is_yield,
            },
            Box::new(|_: Argument| -> UnitResult { Ok(()) }),
            no_argument(),
        )
    }

    #[test]
    fn test_fifo_order() {
        let queue = ContinuationQueue::new();
        for id in 1..=5 {
            queue.enqueue(unit(id, false));
        }
        assert_eq!(queue.len(), 5);

        let order: Vec<u64> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|u| u.id().as_u64())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let queue = ContinuationQueue::new();
        assert!(queue.try_peek().is_none());

        queue.enqueue(unit(1, true));
        let head = queue.try_peek().unwrap();
        assert_eq!(head.id, UnitId::from_raw(1));
        assert!(head.flags.is_yield_continuation);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_when_non_empty_pending_until_enqueue() {
        let queue = ContinuationQueue::new();
        let mut waiter = Box::pin(queue.when_non_empty());
        assert!(waiter.as_mut().now_or_never().is_none());

        queue.enqueue(unit(1, false));
        assert!(waiter.now_or_never().is_some());
    }

    #[test]
    fn test_when_non_empty_immediate_if_queued() {
        let queue = ContinuationQueue::new();
        queue.enqueue(unit(1, false));
        assert!(queue.when_non_empty().now_or_never().is_some());
    }

    #[test]
    fn test_signal_rearmed_after_drain() {
        let queue = ContinuationQueue::new();
        queue.enqueue(unit(1, false));
        queue.enqueue(unit(2, false));

        queue.try_dequeue();
        // Still one unit left: signal stays raised.
        assert!(queue.when_non_empty().now_or_never().is_some());

        queue.try_dequeue();
        assert!(queue.when_non_empty().now_or_never().is_none());
    }

    #[test]
    fn test_shared_signal_wakes_all_waiters() {
        let queue = ContinuationQueue::new();
        let first = queue.when_non_empty();
        let second = queue.when_non_empty();

        queue.enqueue(unit(1, false));
        assert!(first.now_or_never().is_some());
        assert!(second.now_or_never().is_some());
    }

    #[test]
    fn test_clear_drops_units_and_rearms() {
        let queue = ContinuationQueue::new();
        queue.enqueue(unit(1, false));
        queue.enqueue(unit(2, false));

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.when_non_empty().now_or_never().is_none());
    }

    #[test]
    fn test_try_snapshot() {
        let queue = ContinuationQueue::new();
        queue.enqueue(unit(1, false));
        queue.enqueue(unit(2, true));

        let snapshot = queue.try_snapshot().unwrap();
        let ids: Vec<u64> = snapshot.iter().map(|i| i.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(snapshot[1].flags.is_yield_continuation);
    }

    #[tokio::test]
    async fn test_when_non_empty_across_threads() {
        let queue = Arc::new(ContinuationQueue::new());
        let waiter = queue.when_non_empty();

        let producer = Arc::clone(&queue);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            producer.enqueue(unit(1, false));
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
    }
}
