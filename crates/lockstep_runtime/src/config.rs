//! Host configuration.

use lockstep_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule used while waiting for a finished routine to quiesce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiescenceConfig {
    /// First delay between drain attempts, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay, in milliseconds
    pub max_backoff_ms: u64,
    /// Factor applied to the delay after each attempt
    pub backoff_multiplier: u32,
    /// Give up after this many attempts (0 = never give up)
    pub max_attempts: u32,
}

impl QuiescenceConfig {
    /// Create the default schedule
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_backoff_ms: 1,
            max_backoff_ms: 100,
            backoff_multiplier: 2,
            max_attempts: 0,
        }
    }

    /// Set the initial delay
    #[must_use]
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set the factor each delay grows by
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the attempt limit
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Check the schedule is usable
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero delay, an inverted range, or a
    /// zero multiplier
    pub fn validate(&self) -> CoreResult<()> {
        if self.initial_backoff_ms == 0 {
            return Err(CoreError::validation(
                "quiescence.initial_backoff_ms",
                "must be greater than zero",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(CoreError::validation(
                "quiescence.max_backoff_ms",
                format!("must be >= initial_backoff_ms ({})", self.initial_backoff_ms),
            ));
        }
        if self.backoff_multiplier == 0 {
            return Err(CoreError::validation(
                "quiescence.backoff_multiplier",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Iterator over the delays of this schedule
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next_ms: self.initial_backoff_ms,
            max_ms: self.max_backoff_ms,
            multiplier: u64::from(self.backoff_multiplier),
        }
    }
}

impl Default for QuiescenceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Increasing delays, capped. Never ends.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_ms: u64,
    max_ms: u64,
    multiplier: u64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next_ms.min(self.max_ms);
        self.next_ms = current.saturating_mul(self.multiplier).min(self.max_ms);
        Some(Duration::from_millis(current))
    }
}

/// Configuration shared by every routine a host starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Thread name prefix for unit worker threads
    pub worker_name_prefix: String,
    /// Post-completion drain schedule
    pub quiescence: QuiescenceConfig,
    /// Whether schedulers keep metrics
    pub metrics_enabled: bool,
}

impl HostConfig {
    /// Create a default config
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_name_prefix: "lockstep-worker".to_string(),
            quiescence: QuiescenceConfig::default(),
            metrics_enabled: true,
        }
    }

    /// Set worker thread name prefix
    #[must_use]
    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    /// Set quiescence schedule
    #[must_use]
    pub fn with_quiescence(mut self, quiescence: QuiescenceConfig) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Disable scheduler metrics
    #[must_use]
    pub fn without_metrics(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Validate the whole config
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found
    pub fn validate(&self) -> CoreResult<()> {
        if self.worker_name_prefix.is_empty() {
            return Err(CoreError::validation(
                "worker_name_prefix",
                "must not be empty",
            ));
        }
        self.quiescence.validate()
    }

    /// Parse and validate a JSON config; missing fields take defaults
    ///
    /// # Errors
    ///
    /// Returns error on malformed JSON or invalid values
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_default() {
        let config = HostConfig::default();
        assert_eq!(config.worker_name_prefix, "lockstep-worker");
        assert!(config.metrics_enabled);
        assert_eq!(config.quiescence.max_attempts, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_host_config_builders() {
        let config = HostConfig::new()
            .with_worker_name_prefix("wf")
            .with_quiescence(QuiescenceConfig::new().with_max_attempts(3))
            .without_metrics();
        assert_eq!(config.worker_name_prefix, "wf");
        assert_eq!(config.quiescence.max_attempts, 3);
        assert!(!config.metrics_enabled);
    }

    #[test]
    fn test_from_json_partial() {
        let config = HostConfig::from_json(r#"{"quiescence": {"max_backoff_ms": 50}}"#).unwrap();
        assert_eq!(config.quiescence.max_backoff_ms, 50);
        assert_eq!(config.quiescence.initial_backoff_ms, 1);
        assert_eq!(config.worker_name_prefix, "lockstep-worker");
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = HostConfig::from_json(
            r#"{"quiescence": {"initial_backoff_ms": 10, "max_backoff_ms": 5}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation { ref field, .. } if field == "quiescence.max_backoff_ms"
        ));

        let err = HostConfig::from_json("{").unwrap_err();
        assert!(matches!(err, CoreError::InvalidEncoding { .. }));
    }

    #[test]
    fn test_validate_empty_prefix() {
        let config = HostConfig::new().with_worker_name_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let schedule = QuiescenceConfig::new()
            .with_initial_backoff(1)
            .with_max_backoff(10);
        let delays: Vec<u64> = schedule
            .backoff()
            .take(6)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_backoff_multiplier_one_is_constant() {
        let schedule = QuiescenceConfig::new()
            .with_initial_backoff(5)
            .with_backoff_multiplier(1);
        assert_eq!(schedule.backoff_multiplier, 1);
        assert!(schedule.backoff().take(4).all(|d| d == Duration::from_millis(5)));
    }

    #[test]
    fn test_zero_backoff_multiplier_rejected() {
        let schedule = QuiescenceConfig::new().with_backoff_multiplier(0);
        assert!(schedule.validate().is_err());
    }
}
