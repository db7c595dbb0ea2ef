use crate::error::{Result, ScribeError};
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default model identifier for summarisation calls.
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Summarisation calls allowed in flight at once, across all runs.
    /// Tunable at runtime through the gate.
    pub max_concurrency: usize,

    /// Only object keys ending with this suffix are admitted.
    pub suffix_filter: String,

    /// Fetch retries after the first attempt.
    pub max_fetch_retries: u32,

    /// Index-write retries after the first attempt.
    pub max_index_retries: u32,

    /// Delays between fetch attempts. `max_attempts` is derived from
    /// `max_fetch_retries`.
    pub fetch_backoff: BackoffPolicy,

    /// Delays between index-write attempts. `max_attempts` is derived from
    /// `max_index_retries`.
    pub index_backoff: BackoffPolicy,

    /// Backoff for throttled summarisation calls.
    pub summarization_backoff: BackoffPolicy,

    /// Wall-clock budget for one run, slot wait included.
    pub run_timeout_ms: u64,

    /// How long a run waits for a concurrency slot before giving up.
    pub slot_acquire_timeout_ms: u64,

    /// Lease on a held slot. A holder that outlives it loses the slot.
    pub slot_lease_ms: u64,

    pub model_id: String,

    pub max_tokens: u32,

    /// Characters of source content stored next to the summary.
    pub excerpt_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            suffix_filter: ".txt".to_string(),
            max_fetch_retries: 3,
            max_index_retries: 3,
            fetch_backoff: BackoffPolicy {
                base_delay_ms: 200,
                max_delay_ms: 5_000,
                max_attempts: 4,
                jitter: true,
            },
            index_backoff: BackoffPolicy {
                base_delay_ms: 200,
                max_delay_ms: 5_000,
                max_attempts: 4,
                jitter: true,
            },
            summarization_backoff: BackoffPolicy::default(),
            run_timeout_ms: 300_000,
            slot_acquire_timeout_ms: 30_000,
            slot_lease_ms: 600_000,
            model_id: DEFAULT_MODEL_ID.to_string(),
            max_tokens: 1000,
            excerpt_chars: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_suffix_filter(mut self, suffix: impl Into<String>) -> Self {
        self.suffix_filter = suffix.into();
        self
    }

    pub fn with_fetch_retries(mut self, retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_fetch_retries = retries;
        self.fetch_backoff = backoff;
        self
    }

    pub fn with_index_retries(mut self, retries: u32, backoff: BackoffPolicy) -> Self {
        self.max_index_retries = retries;
        self.index_backoff = backoff;
        self
    }

    pub fn with_summarization_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.summarization_backoff = backoff;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_slot_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.slot_acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_slot_lease(mut self, lease: Duration) -> Self {
        self.slot_lease_ms = lease.as_millis() as u64;
        self
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn slot_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_acquire_timeout_ms)
    }

    pub fn slot_lease(&self) -> Duration {
        Duration::from_millis(self.slot_lease_ms)
    }

    /// Fetch schedule with `max_attempts` taken from `max_fetch_retries`.
    pub fn fetch_policy(&self) -> BackoffPolicy {
        self.fetch_backoff
            .clone()
            .with_max_attempts(self.max_fetch_retries.saturating_add(1))
    }

    /// Index schedule with `max_attempts` taken from `max_index_retries`.
    pub fn index_policy(&self) -> BackoffPolicy {
        self.index_backoff
            .clone()
            .with_max_attempts(self.max_index_retries.saturating_add(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ScribeError::Config("max_concurrency must be > 0".into()));
        }
        if self.run_timeout_ms == 0 {
            return Err(ScribeError::Config("run_timeout_ms must be > 0".into()));
        }
        if self.slot_lease_ms == 0 {
            return Err(ScribeError::Config("slot_lease_ms must be > 0".into()));
        }
        // A lease may only lapse once its holder's run is already over.
        if self.slot_lease_ms <= self.run_timeout_ms {
            return Err(ScribeError::Config(format!(
                "slot_lease_ms ({}) must exceed run_timeout_ms ({})",
                self.slot_lease_ms, self.run_timeout_ms
            )));
        }
        if self.model_id.trim().is_empty() {
            return Err(ScribeError::Config("model_id must not be empty".into()));
        }
        self.fetch_policy().validate("fetch_backoff")?;
        self.index_policy().validate("index_backoff")?;
        self.summarization_backoff.validate("summarization_backoff")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.suffix_filter, ".txt");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_counts_drive_attempts() {
        let config = PipelineConfig::new()
            .with_fetch_retries(2, BackoffPolicy::default())
            .with_index_retries(0, BackoffPolicy::default());
        assert_eq!(config.fetch_policy().max_attempts, 3);
        assert_eq!(config.index_policy().max_attempts, 1);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PipelineConfig::new().with_max_concurrency(0);
        assert!(matches!(config.validate(), Err(ScribeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_lease_not_longer_than_run_timeout() {
        let short = PipelineConfig::new()
            .with_slot_lease(Duration::from_secs(1))
            .with_run_timeout(Duration::from_secs(60));
        assert!(matches!(short.validate(), Err(ScribeError::Config(_))));

        let equal = PipelineConfig::new()
            .with_slot_lease(Duration::from_secs(60))
            .with_run_timeout(Duration::from_secs(60));
        assert!(matches!(equal.validate(), Err(ScribeError::Config(_))));

        let longer = PipelineConfig::new()
            .with_slot_lease(Duration::from_millis(60_001))
            .with_run_timeout(Duration::from_secs(60));
        assert!(longer.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_concurrency": 3, "summarization_backoff": {"max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.suffix_filter, ".txt");
        assert_eq!(config.summarization_backoff.max_attempts, 2);
        assert_eq!(config.summarization_backoff.base_delay_ms, 500);
    }
}
