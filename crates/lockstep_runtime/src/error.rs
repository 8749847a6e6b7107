//! Runtime error types.

use lockstep_core::{CoreError, UnitId};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Runtime result type
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failure of a single drained work unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitFailure {
    /// Callback returned an error
    #[error("unit {unit} failed: {message}")]
    Failed {
        /// Failing unit
        unit: UnitId,
        /// Error message
        message: String,
    },

    /// Callback panicked
    #[error("unit {unit} panicked: {message}")]
    Panicked {
        /// Failing unit
        unit: UnitId,
        /// Panic payload rendered as text
        message: String,
    },

    /// No worker thread could be started for the unit
    #[error("no worker for unit {unit}: {message}")]
    WorkerUnavailable {
        /// Unit that never ran
        unit: UnitId,
        /// OS error message
        message: String,
    },
}

impl UnitFailure {
    /// Unit this failure belongs to
    #[must_use]
    pub fn unit(&self) -> UnitId {
        match self {
            Self::Failed { unit, .. }
            | Self::Panicked { unit, .. }
            | Self::WorkerUnavailable { unit, .. } => *unit,
        }
    }
}

/// Failures collected during one drain call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContinuationFailure {
    /// Exactly one unit failed
    #[error(transparent)]
    Single(UnitFailure),

    /// Two or more units failed
    #[error("{} continuations failed during one drain", .0.len())]
    Aggregate(Vec<UnitFailure>),
}

impl ContinuationFailure {
    /// Fold collected failures; `None` when nothing failed
    #[must_use]
    pub fn from_failures(mut failures: Vec<UnitFailure>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(Self::Single),
            _ => Some(Self::Aggregate(failures)),
        }
    }

    /// All failures, in execution order
    #[must_use]
    pub fn failures(&self) -> &[UnitFailure] {
        match self {
            Self::Single(failure) => std::slice::from_ref(failure),
            Self::Aggregate(failures) => failures,
        }
    }
}

/// Runtime error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Operation not supported by the routine context
    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation {
        /// Rejected operation
        operation: String,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {reason}")]
    InvalidState {
        /// Why the operation was rejected
        reason: String,
    },

    /// Drained continuations failed
    #[error(transparent)]
    Continuation(#[from] ContinuationFailure),

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] CoreError),

    /// Background pump loop could not be joined
    #[error("Background pump failed: {message}")]
    Background {
        /// Join error message
        message: String,
    },
}

impl RuntimeError {
    /// Shorthand for an invalid state error
    #[must_use]
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }
}

/// Error returned by routine bodies
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutineError {
    /// The routine observed cancellation
    #[error("routine cancelled")]
    Cancelled,

    /// The routine failed
    #[error("{0}")]
    Failed(String),
}

impl RoutineError {
    /// Build a failure from anything displayable
    #[must_use]
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    /// Return `Err(Cancelled)` if the token has been cancelled
    pub fn ensure_not_cancelled(token: &tokio_util::sync::CancellationToken) -> Result<(), Self> {
        if token.is_cancelled() {
            Err(Self::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Why a routine's completion settled as faulted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RoutineFault {
    /// The routine returned an error
    #[error("routine failed: {0}")]
    Failed(String),

    /// The routine panicked after its first suspension
    #[error("routine panicked: {0}")]
    Panicked(String),
}

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
