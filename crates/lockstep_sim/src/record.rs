//! Recording of interleaved runs.

use crate::seed::SimSeed;
use serde::{Deserialize, Serialize};

/// One pump performed by the interleaver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveStep {
    /// Step index, from zero
    pub step: u64,
    /// Label of the pumped handle
    pub label: String,
    /// Units the pump executed
    pub executed: usize,
    /// Whether the pump stopped in front of a yield
    pub stopped_at_yield: bool,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterleaveOutcome {
    /// Every registered handle completed
    Completed,
    /// The step limit was reached first
    StepLimit,
    /// Some handle is incomplete but no handle has queued work
    Stalled,
}

/// Record of one interleaved run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterleaveRecord {
    /// Seed the run used
    pub seed: SimSeed,
    /// Step limit configured
    pub max_steps: u64,
    /// Steps in the order they ran
    pub steps: Vec<InterleaveStep>,
    /// How the run ended
    pub outcome: InterleaveOutcome,
}

impl InterleaveRecord {
    /// Create an empty record
    #[must_use]
    pub fn new(seed: SimSeed, max_steps: u64) -> Self {
        Self {
            seed,
            max_steps,
            steps: Vec::new(),
            outcome: InterleaveOutcome::StepLimit,
        }
    }

    /// Number of steps taken
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Labels in the order they were pumped
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    /// Total units executed for `label`
    #[must_use]
    pub fn units_for(&self, label: &str) -> usize {
        self.steps
            .iter()
            .filter(|s| s.label == label)
            .map(|s| s.executed)
            .sum()
    }

    /// Whether every handle completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == InterleaveOutcome::Completed
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
