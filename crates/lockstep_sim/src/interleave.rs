//! Seeded interleaving of routine handles.

use crate::error::{SimError, SimResult};
use crate::record::{InterleaveOutcome, InterleaveRecord, InterleaveStep};
use crate::seed::SimSeed;
use lockstep_core::{CoreError, CoreResult};
use lockstep_runtime::{DrainReport, RoutineHandle, RuntimeResult};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Anything the interleaver can single-step
pub trait Pumpable {
    /// Whether the routine has settled
    fn is_completed(&self) -> bool;

    /// Units currently queued
    fn pending_units(&self) -> usize;

    /// Run one drain
    ///
    /// # Errors
    ///
    /// Returns the failures of the units executed
    fn pump(&self, break_on_yield: bool) -> RuntimeResult<DrainReport>;
}

impl<R> Pumpable for RoutineHandle<R> {
    fn is_completed(&self) -> bool {
        RoutineHandle::is_completed(self)
    }

    fn pending_units(&self) -> usize {
        RoutineHandle::pending_units(self)
    }

    fn pump(&self, break_on_yield: bool) -> RuntimeResult<DrainReport> {
        RoutineHandle::pump(self, break_on_yield)
    }
}

/// Interleaver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveConfig {
    /// Seed for handle selection
    pub seed: SimSeed,
    /// Maximum number of pumps
    pub max_steps: u64,
    /// Stop each pump at yield boundaries
    pub break_on_yield: bool,
}

impl InterleaveConfig {
    /// Create a config
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            max_steps: 10_000,
            break_on_yield: true,
        }
    }

    /// Set the step limit
    #[must_use]
    pub fn with_max_steps(mut self, max: u64) -> Self {
        self.max_steps = max;
        self
    }

    /// Let each pump run through yield boundaries
    #[must_use]
    pub fn without_yield_breaks(mut self) -> Self {
        self.break_on_yield = false;
        self
    }

    /// Check the config is usable
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero step limit
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_steps == 0 {
            return Err(CoreError::validation("max_steps", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for InterleaveConfig {
    fn default() -> Self {
        Self::new(SimSeed::default())
    }
}

struct Entry<'a> {
    label: String,
    handle: Box<dyn Pumpable + 'a>,
}

/// Pumps registered handles in a seeded random order
pub struct Interleaver<'a> {
    config: InterleaveConfig,
    rng: ChaCha8Rng,
    entries: Vec<Entry<'a>>,
}

impl<'a> Interleaver<'a> {
    /// Create an interleaver
    ///
    /// # Errors
    ///
    /// Returns a validation error if `config` is unusable
    pub fn new(config: InterleaveConfig) -> SimResult<Self> {
        config.validate()?;
        let rng = config.seed.derive("interleave").rng();
        Ok(Self {
            config,
            rng,
            entries: Vec::new(),
        })
    }

    /// Register a handle under `label`
    ///
    /// # Errors
    ///
    /// Returns `DuplicateLabel` if the label is taken
    pub fn register(
        &mut self,
        label: impl Into<String>,
        handle: impl Pumpable + 'a,
    ) -> SimResult<()> {
        let label = label.into();
        if self.entries.iter().any(|e| e.label == label) {
            return Err(SimError::DuplicateLabel(label));
        }
        self.entries.push(Entry {
            label,
            handle: Box::new(handle),
        });
        Ok(())
    }

    /// Number of registered handles
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handle is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn all_completed(&self) -> bool {
        self.entries.iter().all(|e| e.handle.is_completed())
    }

    /// Pump handles until all complete, none has work, or the step limit.
    ///
    /// Each step picks uniformly among the handles that have queued work.
    ///
    /// # Errors
    ///
    /// Returns `Pump` with the label of the first handle whose pump failed
    pub fn run(&mut self) -> SimResult<InterleaveRecord> {
        let mut record = InterleaveRecord::new(self.config.seed.clone(), self.config.max_steps);

        for step in 0..self.config.max_steps {
            if self.all_completed() {
                record.outcome = InterleaveOutcome::Completed;
                break;
            }

            let ready: Vec<usize> = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.handle.pending_units() > 0)
                .map(|(i, _)| i)
                .collect();
            if ready.is_empty() {
                record.outcome = InterleaveOutcome::Stalled;
                break;
            }

            let pick = ready[self.rng.gen_range(0..ready.len())];
            let entry = &self.entries[pick];
            let report = entry
                .handle
                .pump(self.config.break_on_yield)
                .map_err(|source| SimError::Pump {
                    label: entry.label.clone(),
                    source,
                })?;
            tracing::debug!(
                step,
                label = %entry.label,
                executed = report.executed,
                "pumped"
            );

            record.steps.push(InterleaveStep {
                step,
                label: entry.label.clone(),
                executed: report.executed,
                stopped_at_yield: report.stopped_at_yield,
            });
        }

        if record.outcome == InterleaveOutcome::StepLimit && self.all_completed() {
            record.outcome = InterleaveOutcome::Completed;
        }
        tracing::debug!(
            steps = record.step_count(),
            outcome = ?record.outcome,
            "interleave finished"
        );
        Ok(record)
    }
}
