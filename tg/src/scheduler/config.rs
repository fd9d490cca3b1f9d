//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::retry::{Backoff, RetryPolicy};

/// Rejected scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config: concurrency-limit must be at least 1")]
    ZeroConcurrency,

    #[error("Invalid config: timeout-ms must be positive when set")]
    ZeroTimeout,

    #[error("Invalid config: exponential backoff factor must be at least 1")]
    ZeroBackoffFactor,
}

/// Scheduler configuration
///
/// Immutable once handed to [`super::Scheduler::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max attempts running at once
    #[serde(rename = "concurrency-limit")]
    pub concurrency_limit: usize,

    /// Per-attempt timeout in milliseconds; unbounded when absent
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Retry policy applied to failed attempts
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Check the configuration, failing fast on values the scheduler cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit < 1 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if let Backoff::Exponential { factor: 0, .. } = self.retry.backoff {
            return Err(ConfigError::ZeroBackoffFactor);
        }
        Ok(())
    }

    /// Get the per-attempt timeout as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Build the retry policy described by this config
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.max_attempts, self.retry.backoff.clone())
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts allowed; 0 and 1 both mean a single attempt
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay between a failed attempt and its retry
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}
