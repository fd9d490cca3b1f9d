//! Timeout guard for a single attempt
//!
//! The timer races the attempt; whichever settles first decides the outcome.
//! A timed-out attempt is abandoned, not aborted: the body may keep running
//! but nothing observes its result.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::SchedulerError;

/// Race `fut` against `timeout`, mapping its error into [`SchedulerError::Task`]
///
/// With no timeout the future's own outcome passes straight through.
pub async fn with_timeout<Fut, T, E>(fut: Fut, timeout: Option<Duration>, attempt: u32) -> Result<T, SchedulerError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    debug!(?timeout, attempt, "with_timeout: called");
    let Some(limit) = timeout else {
        return fut.await.map_err(SchedulerError::Task);
    };

    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(SchedulerError::Task),
        Err(_) => {
            warn!(?limit, attempt, "with_timeout: attempt timed out");
            Err(SchedulerError::TimeoutExceeded { timeout: limit, attempt })
        }
    }
}

/// Run one scheduler attempt on its own task, guarded by `timeout`
///
/// The body is spawned so that a timed-out attempt can keep running detached
/// and a panicking one cannot take the scheduler's bookkeeping down with it.
pub(crate) async fn guard_attempt<Fut, T, E>(
    fut: Fut,
    timeout: Option<Duration>,
    attempt: u32,
) -> Result<T, SchedulerError<E>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    debug!(attempt, ?timeout, "guard_attempt: called");
    let body = tokio::spawn(fut);

    let joined = match timeout {
        Some(limit) => {
            let deadline = Instant::now() + limit;
            match tokio::time::timeout_at(deadline, body).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Dropping the JoinHandle detaches the body; its result is discarded
                    warn!(?limit, attempt, "guard_attempt: attempt timed out");
                    return Err(SchedulerError::TimeoutExceeded { timeout: limit, attempt });
                }
            }
        }
        None => body.await,
    };

    match joined {
        Ok(result) => result.map_err(SchedulerError::Task),
        Err(e) if e.is_panic() => {
            warn!(attempt, "guard_attempt: attempt panicked");
            Err(SchedulerError::Panicked { attempt })
        }
        Err(_) => {
            debug!(attempt, "guard_attempt: body cancelled by runtime shutdown");
            Err(SchedulerError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_without_timeout() {
        let result: Result<u32, SchedulerError<String>> = with_timeout(async { Ok(7) }, None, 1).await;
        assert_eq!(result.unwrap(), 7);

        let result: Result<u32, SchedulerError<String>> =
            with_timeout(async { Err("boom".to_string()) }, None, 1).await;
        assert_eq!(result.unwrap_err().into_task_error(), Some("boom".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_first() {
        let start = Instant::now();
        let result: Result<(), SchedulerError<String>> =
            with_timeout(std::future::pending::<Result<(), String>>(), Some(Duration::from_millis(50)), 2).await;

        match result {
            Err(SchedulerError::TimeoutExceeded { timeout, attempt }) => {
                assert_eq!(timeout, Duration::from_millis(50));
                assert_eq!(attempt, 2);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_settles_before_timeout() {
        let fut = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, String>("done")
        };
        let result = with_timeout(fut, Some(Duration::from_millis(50)), 1).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_detaches_timed_out_body() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let fut = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, String>(())
        };

        let result = guard_attempt(fut, Some(Duration::from_millis(20)), 1).await;
        assert!(result.unwrap_err().is_timeout());
        assert!(!finished.load(Ordering::SeqCst));

        // The orphaned body keeps running to completion
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_guard_maps_panic() {
        let fut = async {
            if true {
                panic!("task blew up");
            }
            Ok::<(), String>(())
        };
        let result = guard_attempt(fut, None, 3).await;
        assert!(matches!(result, Err(SchedulerError::Panicked { attempt: 3 })));
    }
}
