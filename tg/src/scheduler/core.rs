//! Scheduler implementation

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, Notify, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{ConfigError, SchedulerConfig};
use super::error::SchedulerError;
use super::handle::{Handle, Outcome};
use super::queue::{
    Pending, QueueEntry, QueueEntryStatus, QueueState, QueuedSubmission, Rejection, RunningAttempt, SchedulerStats,
    SlotState, Submission,
};
use super::retry::{Decision, RetryPolicy};
use super::timeout::guard_attempt;

/// Internal state protected by mutex
pub(crate) struct SchedulerInner {
    /// FIFO of submissions waiting for a slot
    queue: VecDeque<QueuedSubmission>,

    /// Attempts currently holding a slot, by submission seq
    running: HashMap<u64, RunningAttempt>,

    /// Set once by shutdown; never cleared
    closed: bool,

    /// Next submission sequence number
    next_seq: u64,

    /// Statistics
    stats: SchedulerStats,
}

/// State shared between the scheduler and its in-flight attempts
pub(crate) struct Shared {
    config: SchedulerConfig,
    policy: RetryPolicy,
    inner: Mutex<SchedulerInner>,
    /// Signalled whenever the last running attempt releases its slot
    idle: Notify,
    /// Flips to true on shutdown; wakes submissions sleeping in backoff
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    /// Admit `entry` if a slot is free, otherwise queue it at the tail
    fn admit(self: &Arc<Self>, inner: &mut SchedulerInner, entry: QueuedSubmission) {
        let seq = entry.job.seq();
        if inner.running.len() < self.config.concurrency_limit {
            debug!(seq, active = inner.running.len(), "Shared::admit: slot free, starting");
            self.start(inner, entry);
        } else {
            inner.queue.push_back(entry);
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
            debug!(seq, queued = inner.queue.len(), "Shared::admit: limit reached, queued");
        }
    }

    fn start(self: &Arc<Self>, inner: &mut SchedulerInner, entry: QueuedSubmission) {
        let now = Instant::now();
        let attempt = entry.job.attempt();
        inner.running.insert(entry.job.seq(), RunningAttempt { attempt, started_at: now });
        inner.stats.total_attempts += 1;
        inner.stats.total_wait_time_ms += (now - entry.queued_at).as_millis() as u64;
        inner.stats.peak_active = inner.stats.peak_active.max(inner.running.len());
        entry.job.start(self.clone());
    }

    /// Release the slot held by `seq` and promote queued submissions into free slots
    fn release(self: &Arc<Self>, inner: &mut SchedulerInner, seq: u64) {
        if inner.running.remove(&seq).is_none() {
            warn!(seq, "Shared::release: no running attempt for seq");
        }

        while inner.running.len() < self.config.concurrency_limit {
            let Some(next) = inner.queue.pop_front() else {
                break;
            };
            debug!(seq = next.job.seq(), "Shared::release: promoting from queue");
            self.start(inner, next);
        }

        if inner.running.is_empty() {
            debug!("Shared::release: scheduler idle");
            self.idle.notify_waiters();
        }
    }

    async fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().await
    }
}

impl<F, Fut, T, E> Submission<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run the current attempt to settlement, then deliver, retry, or give up
    async fn drive(mut self: Box<Self>, shared: Arc<Shared>) {
        let seq = self.seq;
        let attempt = self.attempt;
        self.state = SlotState::Running;
        debug!(seq, attempt, "Submission::drive: called");

        // A panic while building the future or computing the backoff must not
        // unwind past release, or the slot would leak
        let built = panic::catch_unwind(AssertUnwindSafe(|| (self.task)()));
        let outcome = match built {
            Ok(fut) => guard_attempt(fut, shared.config.timeout(), attempt).await,
            Err(_) => {
                warn!(seq, attempt, "Submission::drive: task panicked before returning a future");
                Err(SchedulerError::Panicked { attempt })
            }
        };
        let decision = panic::catch_unwind(AssertUnwindSafe(|| shared.policy.decide_outcome(attempt, &outcome)))
            .unwrap_or_else(|_| {
                warn!(seq, attempt, "Submission::drive: backoff panicked, giving up");
                Decision::Exhaust
            });

        let mut inner = shared.lock().await;
        if matches!(outcome, Err(SchedulerError::TimeoutExceeded { .. })) {
            inner.stats.total_timeouts += 1;
        }

        if inner.closed && matches!(decision, Decision::Retry { .. }) {
            debug!(seq, attempt, "Submission::drive: closed, retry forced to exhaust");
            inner.stats.total_rejected += 1;
            self.settle(Err(SchedulerError::Closed));
            shared.release(&mut inner, seq);
            return;
        }

        let delay = match decision {
            Decision::Accept => {
                debug!(seq, attempt, "Submission::drive: accepted");
                inner.stats.total_succeeded += 1;
                self.settle(outcome);
                shared.release(&mut inner, seq);
                return;
            }
            Decision::Exhaust => {
                debug!(seq, attempt, "Submission::drive: attempts exhausted");
                inner.stats.total_failed += 1;
                self.settle(outcome);
                shared.release(&mut inner, seq);
                return;
            }
            Decision::Retry { delay } => delay,
        };

        // Backoff does not hold a slot
        shared.release(&mut inner, seq);
        drop(inner);
        drop(outcome);

        warn!(seq, attempt, delay_ms = delay.as_millis() as u64, "Submission::drive: retrying after failure");
        self.state = SlotState::Pending;
        let mut closed_rx = shared.closed_tx.subscribe();
        let closed = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = closed_rx.wait_for(|closed| *closed) => changed.is_ok(),
        };
        if closed {
            debug!(seq, attempt, "Submission::drive: shutdown during backoff");
            shared.lock().await.stats.total_rejected += 1;
            self.settle(Err(SchedulerError::Closed));
            return;
        }

        let mut inner = shared.lock().await;
        if inner.closed {
            debug!(seq, attempt, "Submission::drive: closed before retry admission");
            inner.stats.total_rejected += 1;
            self.settle(Err(SchedulerError::Closed));
            return;
        }
        self.attempt += 1;
        inner.stats.total_retries += 1;
        shared.admit(&mut inner, QueuedSubmission::new(self));
    }
}

impl<F, Fut, T, E> Pending for Submission<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn seq(&self) -> u64 {
        self.seq
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn start(self: Box<Self>, shared: Arc<Shared>) {
        tokio::spawn(self.drive(shared));
    }

    fn reject(mut self: Box<Self>, reason: Rejection) {
        debug!(seq = self.seq, state = ?self.state, ?reason, "Submission::reject: called");
        let error = match reason {
            Rejection::Closed => SchedulerError::Closed,
            Rejection::Cancelled => SchedulerError::Cancelled,
        };
        self.settle(Err(error));
    }
}

/// The Scheduler runs submitted tasks under a concurrency limit, guarding
/// each attempt with a timeout and retrying failures per its retry policy.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a new scheduler, rejecting an invalid configuration
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        debug!(?config, "Scheduler::new: called");
        config.validate()?;

        let policy = config.retry_policy();
        let (closed_tx, _) = watch::channel(false);
        info!(
            concurrency_limit = config.concurrency_limit,
            timeout_ms = ?config.timeout_ms,
            max_attempts = config.retry.max_attempts,
            "Scheduler created"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                policy,
                inner: Mutex::new(SchedulerInner {
                    queue: VecDeque::new(),
                    running: HashMap::new(),
                    closed: false,
                    next_seq: 1,
                    stats: SchedulerStats::default(),
                }),
                idle: Notify::new(),
                closed_tx,
            }),
        })
    }

    /// Configuration this scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Submit a task; the returned handle resolves to its final outcome
    ///
    /// `task` is invoked once per attempt. Fails immediately with
    /// [`SchedulerError::Closed`] after shutdown has begun.
    pub async fn enqueue<F, Fut, T, E>(&self, task: F) -> Result<Handle<T, E>, SchedulerError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut inner = self.shared.lock().await;
        if inner.closed {
            debug!("Scheduler::enqueue: closed, rejecting");
            inner.stats.total_rejected += 1;
            return Err(SchedulerError::Closed);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.stats.total_submitted += 1;
        debug!(seq, "Scheduler::enqueue: called");

        let (tx, rx) = oneshot::channel();
        let submission = Submission::new(seq, task, tx);
        self.shared.admit(&mut inner, QueuedSubmission::new(Box::new(submission)));

        Ok(Handle::new(seq, rx))
    }

    /// Run every task under this scheduler's limits, returning outcomes in input order
    ///
    /// Tasks are enqueued in iteration order. If the scheduler closes partway,
    /// the remaining entries are [`SchedulerError::Closed`].
    pub async fn run_all<I, F, Fut, T, E>(&self, tasks: I) -> Vec<Outcome<T, E>>
    where
        I: IntoIterator<Item = F>,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        debug!("Scheduler::run_all: called");
        let mut submitted = Vec::new();
        for task in tasks {
            submitted.push(self.enqueue(task).await);
        }
        debug!(count = submitted.len(), "Scheduler::run_all: all tasks enqueued");

        futures::future::join_all(submitted.into_iter().map(|entry| async move {
            match entry {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            }
        }))
        .await
    }

    /// Stop admitting work and wait for running attempts to settle
    ///
    /// Queued submissions and submissions sleeping in backoff settle with
    /// [`SchedulerError::Closed`]. Running attempts finish but are not retried.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        debug!("Scheduler::shutdown: called");
        let rejected: Vec<_> = {
            let mut inner = self.shared.lock().await;
            if !inner.closed {
                info!(
                    active = inner.running.len(),
                    queued = inner.queue.len(),
                    "Scheduler shutting down"
                );
                inner.closed = true;
                self.shared.closed_tx.send_replace(true);
            }
            let drained: Vec<_> = inner.queue.drain(..).collect();
            inner.stats.total_rejected += drained.len() as u64;
            drained
        };

        for entry in rejected {
            entry.job.reject(Rejection::Closed);
        }

        loop {
            let idle = self.shared.idle.notified();
            let active = self.shared.lock().await.running.len();
            if active == 0 {
                break;
            }
            debug!(active, "Scheduler::shutdown: waiting for running attempts");
            idle.await;
        }
        info!("Scheduler shut down");
    }

    /// Whether shutdown has begun
    pub async fn is_closed(&self) -> bool {
        self.shared.lock().await.closed
    }

    /// Cancel a queued submission (remove from queue)
    ///
    /// Returns false if `seq` is running, already settled, or unknown.
    pub async fn cancel(&self, seq: u64) -> bool {
        debug!(seq, "Scheduler::cancel: called");
        let mut inner = self.shared.lock().await;

        if inner.running.contains_key(&seq) {
            debug!(seq, "Scheduler::cancel: is running, cannot cancel");
            return false;
        }

        let Some(position) = inner.queue.iter().position(|entry| entry.job.seq() == seq) else {
            debug!(seq, "Scheduler::cancel: not found in queue");
            return false;
        };

        let removed = inner.queue.remove(position);
        inner.stats.total_cancelled += 1;
        drop(inner);

        if let Some(entry) = removed {
            entry.job.reject(Rejection::Cancelled);
        }
        debug!(seq, "Scheduler::cancel: successfully removed from queue");
        true
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let inner = self.shared.lock().await;

        QueueState {
            active: inner.running.len(),
            queued: inner.queue.len(),
            closed: inner.closed,
            stats: inner.stats.clone(),
        }
    }

    /// Get running and queued submissions, running first, each group by seq
    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.shared.lock().await;
        let now = Instant::now();

        let mut running: Vec<_> = inner
            .running
            .iter()
            .map(|(seq, r)| QueueEntry {
                seq: *seq,
                attempt: r.attempt,
                status: QueueEntryStatus::Running,
                wait_time: now - r.started_at,
            })
            .collect();
        running.sort_by_key(|e| e.seq);

        running
            .into_iter()
            .chain(inner.queue.iter().map(|q| QueueEntry {
                seq: q.job.seq(),
                attempt: q.job.attempt(),
                status: QueueEntryStatus::Queued,
                wait_time: now - q.queued_at,
            }))
            .collect()
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.shared.lock().await.stats.clone()
    }
}
