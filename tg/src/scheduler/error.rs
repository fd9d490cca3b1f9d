//! Scheduler error types

use std::time::Duration;
use thiserror::Error;

/// Errors delivered through a submission's handle
///
/// `E` is the task's own error type, carried verbatim in [`SchedulerError::Task`].
#[derive(Debug, Clone, Error)]
pub enum SchedulerError<E> {
    #[error("Task failed: {0}")]
    Task(E),

    #[error("Attempt {attempt} timed out after {timeout:?}")]
    TimeoutExceeded { timeout: Duration, attempt: u32 },

    #[error("Attempt {attempt} panicked")]
    Panicked { attempt: u32 },

    #[error("Scheduler closed")]
    Closed,

    #[error("Submission cancelled before admission")]
    Cancelled,
}

impl<E> SchedulerError<E> {
    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedulerError::TimeoutExceeded { .. })
    }

    /// Check if this error came from scheduler shutdown
    pub fn is_closed(&self) -> bool {
        matches!(self, SchedulerError::Closed)
    }

    /// Check if this error counts as a failed attempt for retry purposes
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Task(_) => true,
            SchedulerError::TimeoutExceeded { .. } => true,
            SchedulerError::Panicked { .. } => true,
            SchedulerError::Closed => false,
            SchedulerError::Cancelled => false,
        }
    }

    /// Borrow the task's own error, if this is one
    pub fn task_error(&self) -> Option<&E> {
        match self {
            SchedulerError::Task(e) => Some(e),
            _ => None,
        }
    }

    /// Take the task's own error, if this is one
    pub fn into_task_error(self) -> Option<E> {
        match self {
            SchedulerError::Task(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_timeout() {
        let err: SchedulerError<String> = SchedulerError::TimeoutExceeded {
            timeout: Duration::from_millis(50),
            attempt: 1,
        };
        assert!(err.is_timeout());
        assert!(!SchedulerError::Task("boom".to_string()).is_timeout());
    }

    #[test]
    fn test_is_retryable() {
        assert!(SchedulerError::Task("boom").is_retryable());
        assert!(
            SchedulerError::<&str>::TimeoutExceeded {
                timeout: Duration::from_millis(10),
                attempt: 2
            }
            .is_retryable()
        );
        assert!(SchedulerError::<&str>::Panicked { attempt: 1 }.is_retryable());

        // Shutdown and cancellation are final
        assert!(!SchedulerError::<&str>::Closed.is_retryable());
        assert!(!SchedulerError::<&str>::Cancelled.is_retryable());
    }

    #[test]
    fn test_task_error_passthrough() {
        let err = SchedulerError::Task(42u32);
        assert_eq!(err.task_error(), Some(&42));
        assert_eq!(err.into_task_error(), Some(42));

        let err: SchedulerError<u32> = SchedulerError::Closed;
        assert!(err.is_closed());
        assert_eq!(err.into_task_error(), None);
    }

    #[test]
    fn test_display() {
        let err: SchedulerError<String> = SchedulerError::TimeoutExceeded {
            timeout: Duration::from_millis(50),
            attempt: 3,
        };
        assert_eq!(err.to_string(), "Attempt 3 timed out after 50ms");
        assert_eq!(SchedulerError::Task("boom").to_string(), "Task failed: boom");
    }
}
