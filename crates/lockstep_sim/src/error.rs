//! Simulation errors.

use lockstep_core::CoreError;
use lockstep_runtime::RuntimeError;

/// Simulation result type
pub type SimResult<T> = Result<T, SimError>;

/// Simulation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// Two handles were registered under the same label
    #[error("Duplicate handle label: {0}")]
    DuplicateLabel(String),

    /// Pumping a handle failed
    #[error("Pump of {label} failed: {source}")]
    Pump {
        /// Label of the handle
        label: String,
        /// Underlying runtime error
        #[source]
        source: RuntimeError,
    },

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] CoreError),
}
