//! LOCKSTEP Simulation
//!
//! Deterministic multiplexing of routine handles. A seeded RNG picks which
//! handle to pump next, so any interleaving a test finds can be replayed from
//! its seed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod interleave;
pub mod record;
pub mod seed;

pub use error::{SimError, SimResult};
pub use interleave::{InterleaveConfig, Interleaver, Pumpable};
pub use record::{InterleaveOutcome, InterleaveRecord, InterleaveStep};
pub use seed::{SeedSource, SimSeed};
