//! Completion of a hosted routine.

use crate::error::RoutineFault;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Final state of a routine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome<R> {
    /// The routine returned a value
    Completed(R),
    /// The routine failed or panicked after suspending
    Faulted(RoutineFault),
    /// The routine observed cancellation, or was cancelled before it started
    Cancelled,
}

impl<R> Outcome<R> {
    /// Whether the routine returned a value
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the routine faulted
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    /// Whether the routine was cancelled
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Borrow the returned value
    #[must_use]
    pub const fn value(&self) -> Option<&R> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// Take the returned value
    #[must_use]
    pub fn into_value(self) -> Option<R> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The fault, if the routine faulted
    #[must_use]
    pub const fn fault(&self) -> Option<&RoutineFault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Write-once slot the routine settles and the host observes
#[derive(Debug)]
pub(crate) struct CompletionCell<R> {
    outcome: Mutex<Option<Outcome<R>>>,
    settled: AtomicBool,
    notify: Notify,
}

impl<R> CompletionCell<R> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            settled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn settled(outcome: Outcome<R>) -> Self {
        Self {
            outcome: Mutex::new(Some(outcome)),
            settled: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    /// Store `outcome` unless one is already stored.
    ///
    /// Returns whether this call settled the cell.
    pub(crate) fn settle(&self, outcome: Outcome<R>) -> bool {
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            self.settled.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Resolve once the cell holds an outcome, without reading it
    pub(crate) async fn wait_settled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_settled() {
                return;
            }
            notified.await;
        }
    }
}

impl<R: Clone> CompletionCell<R> {
    pub(crate) fn outcome(&self) -> Option<Outcome<R>> {
        self.outcome.lock().clone()
    }

    pub(crate) async fn wait(&self) -> Outcome<R> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}
