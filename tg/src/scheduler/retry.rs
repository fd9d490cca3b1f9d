//! Retry policy and backoff

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::SchedulerError;

/// Backoff function supplied from code: attempt number -> delay
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Delay between a failed attempt and its retry
///
/// Every variant is a pure function of the attempt number that just failed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Backoff {
    /// Retry immediately
    None,

    /// Same delay after every failure
    Fixed {
        #[serde(rename = "delay-ms")]
        delay_ms: u64,
    },

    /// `initial_ms * factor^(attempt - 1)`, optionally capped
    Exponential {
        #[serde(rename = "initial-ms")]
        initial_ms: u64,
        factor: u32,
        #[serde(rename = "max-ms", default)]
        max_ms: Option<u64>,
    },

    /// Caller-provided function; not representable in config files
    #[serde(skip)]
    Custom(BackoffFn),
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial_ms: 1000,
            factor: 2,
            max_ms: None,
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::None => f.write_str("None"),
            Backoff::Fixed { delay_ms } => f.debug_struct("Fixed").field("delay_ms", delay_ms).finish(),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => f
                .debug_struct("Exponential")
                .field("initial_ms", initial_ms)
                .field("factor", factor)
                .field("max_ms", max_ms)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Wrap a closure as a backoff
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Backoff::Custom(Arc::new(f))
    }

    /// Delay to wait after `attempt` (numbered from 1) has failed
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exp = attempt.saturating_sub(1);
                let multiplier = (*factor as u64).checked_pow(exp).unwrap_or(u64::MAX);
                let ms = initial_ms.saturating_mul(multiplier);
                let ms = max_ms.map_or(ms, |cap| ms.min(cap));
                Duration::from_millis(ms)
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

/// What to do with a settled attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Deliver the success
    Accept,

    /// Run another attempt after `delay`
    Retry { delay: Duration },

    /// Deliver the failure as permanent
    Exhaust,
}

/// Decides accept/retry/exhaust for each settled attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }

    /// A policy that never retries
    pub fn never() -> Self {
        Self::new(0, Backoff::None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Decide the fate of `attempt` given whether it failed
    pub fn decide(&self, attempt: u32, failed: bool) -> Decision {
        if !failed {
            return Decision::Accept;
        }
        if attempt < self.max_attempts {
            Decision::Retry {
                delay: self.backoff.delay(attempt),
            }
        } else {
            Decision::Exhaust
        }
    }

    /// Decide the fate of a scheduler attempt outcome
    ///
    /// Closed and cancelled outcomes are final no matter how many attempts remain.
    pub fn decide_outcome<T, E>(&self, attempt: u32, outcome: &Result<T, SchedulerError<E>>) -> Decision {
        match outcome {
            Ok(_) => Decision::Accept,
            Err(e) if !e.is_retryable() => Decision::Exhaust,
            Err(_) => self.decide(attempt, true),
        }
    }
}

/// Run `task` until it succeeds or `policy` gives up
///
/// No concurrency limit and no timeout; the last error is returned verbatim.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut task: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    debug!(max_attempts = policy.max_attempts, "retry: called");
    let mut attempt = 1;
    loop {
        let result = task().await;
        let failed = result.is_err();
        match policy.decide(attempt, failed) {
            Decision::Accept => {
                debug!(attempt, "retry: success");
                return result;
            }
            Decision::Exhaust => {
                debug!(attempt, "retry: attempts exhausted");
                return result;
            }
            Decision::Retry { delay } => {
                if let Err(e) = &result {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retry: retrying after failure");
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_backoff_doubles() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_exponential_cap() {
        let backoff = Backoff::Exponential {
            initial_ms: 100,
            factor: 3,
            max_ms: Some(500),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(300));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_custom_backoff() {
        let backoff = Backoff::custom(|attempt| Duration::from_millis(attempt as u64 * 7));
        assert_eq!(backoff.delay(3), Duration::from_millis(21));
        assert_eq!(format!("{:?}", backoff), "Custom(..)");
    }

    #[test]
    fn test_decide_success_always_accepts() {
        let policy = RetryPolicy::new(3, Backoff::None);
        assert_eq!(policy.decide(1, false), Decision::Accept);
        assert_eq!(policy.decide(99, false), Decision::Accept);
    }

    #[test]
    fn test_decide_retries_until_max() {
        let policy = RetryPolicy::new(3, Backoff::Fixed { delay_ms: 10 });
        let retry = Decision::Retry {
            delay: Duration::from_millis(10),
        };
        assert_eq!(policy.decide(1, true), retry);
        assert_eq!(policy.decide(2, true), retry);
        assert_eq!(policy.decide(3, true), Decision::Exhaust);
    }

    #[test]
    fn test_decide_zero_attempts_never_retries() {
        let policy = RetryPolicy::never();
        assert_eq!(policy.decide(1, true), Decision::Exhaust);
    }

    #[test]
    fn test_decide_outcome_closed_is_final() {
        let policy = RetryPolicy::new(5, Backoff::None);
        let closed: Result<(), SchedulerError<String>> = Err(SchedulerError::Closed);
        assert_eq!(policy.decide_outcome(1, &closed), Decision::Exhaust);

        let timeout: Result<(), SchedulerError<String>> = Err(SchedulerError::TimeoutExceeded {
            timeout: Duration::from_millis(5),
            attempt: 1,
        });
        assert_eq!(policy.decide_outcome(1, &timeout), Decision::Retry { delay: Duration::ZERO });
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::Fixed { delay_ms: 100 });

        let result: Result<u32, String> = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n == 1 { Err("first".to_string()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::None);

        let result: Result<(), String> = retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("failure {}", n)) }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    proptest! {
        #[test]
        fn prop_exponential_is_monotonic(initial in 0u64..10_000, factor in 1u32..5, attempt in 1u32..64) {
            let backoff = Backoff::Exponential { initial_ms: initial, factor, max_ms: None };
            prop_assert!(backoff.delay(attempt) <= backoff.delay(attempt + 1));
        }

        #[test]
        fn prop_retry_count_bounded(max_attempts in 0u32..20, attempt in 1u32..40) {
            let policy = RetryPolicy::new(max_attempts, Backoff::None);
            let decision = policy.decide(attempt, true);
            if attempt < max_attempts {
                prop_assert_eq!(decision, Decision::Retry { delay: Duration::ZERO });
            } else {
                prop_assert_eq!(decision, Decision::Exhaust);
            }
        }
    }
}
