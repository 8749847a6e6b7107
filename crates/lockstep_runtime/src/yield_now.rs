//! Cooperative yield points.
//!
//! A yield point marks the wake it causes with a [`YieldMarker`]. The routine
//! context reads the marker while building the work unit for that wake and
//! flags the unit as a yield continuation, which is what lets a drain stop
//! right before it.
//!
//! The marker is versioned. A context only honours markers whose version it
//! recognizes; anything else is treated as an ordinary continuation.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Marker version understood by this runtime
pub const YIELD_MARKER_VERSION: u16 = 1;

thread_local! {
    static PENDING_MARKER: Cell<Option<YieldMarker>> = const { Cell::new(None) };
}

/// Tag carried by the wake of a cooperative yield point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YieldMarker {
    version: u16,
}

impl YieldMarker {
    /// Marker emitted by [`yield_now`]
    pub const CURRENT: Self = Self {
        version: YIELD_MARKER_VERSION,
    };

    /// Marker with an explicit version
    #[must_use]
    pub const fn with_version(version: u16) -> Self {
        Self { version }
    }

    /// Marker version
    #[must_use]
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Whether this runtime treats the marker as a yield boundary
    #[must_use]
    pub const fn is_recognized(&self) -> bool {
        self.version == YIELD_MARKER_VERSION
    }
}

/// Take the marker left by a yield point that is waking on this thread
pub(crate) fn take_pending() -> Option<YieldMarker> {
    PENDING_MARKER.with(Cell::take)
}

pub(crate) fn set_pending(marker: YieldMarker) {
    PENDING_MARKER.with(|cell| cell.set(Some(marker)));
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    marker: YieldMarker,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;

        set_pending(self.marker);
        cx.waker().wake_by_ref();
        // A foreign waker never consumes the marker; do not let it leak into
        // the next unrelated wake on this thread.
        take_pending();

        Poll::Pending
    }
}

/// Suspend once, queueing the rest of the routine as a yield continuation
pub fn yield_now() -> YieldNow {
    yield_with_marker(YieldMarker::CURRENT)
}

/// Suspend once with an explicit marker
pub fn yield_with_marker(marker: YieldMarker) -> YieldNow {
    YieldNow {
        marker,
        yielded: false,
    }
}
