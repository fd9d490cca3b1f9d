//! Queue types for the scheduler

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::core::Shared;
use super::handle::Outcome;

/// Where a submission is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Waiting in the queue, or sleeping in backoff
    Pending,
    /// An attempt holds a slot
    Running,
    /// Outcome delivered
    Settled,
}

/// Why a queued submission was dropped without running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Closed,
    Cancelled,
}

/// Bookkeeping for one enqueued task across all of its attempts
pub(crate) struct Submission<F, T, E> {
    pub(crate) seq: u64,
    pub(crate) attempt: u32,
    pub(crate) state: SlotState,
    pub(crate) task: F,
    pub(crate) tx: Option<oneshot::Sender<Outcome<T, E>>>,
}

impl<F, T, E> Submission<F, T, E> {
    pub(crate) fn new(seq: u64, task: F, tx: oneshot::Sender<Outcome<T, E>>) -> Self {
        Self {
            seq,
            attempt: 1,
            state: SlotState::Pending,
            task,
            tx: Some(tx),
        }
    }

    /// Deliver the final outcome; later calls are no-ops
    pub(crate) fn settle(&mut self, outcome: Outcome<T, E>) {
        self.state = SlotState::Settled;
        if let Some(tx) = self.tx.take() {
            // Receiver may be gone if the caller dropped the handle
            let _ = tx.send(outcome);
        }
    }
}

/// Type-erased submission as the queue stores it
pub(crate) trait Pending: Send {
    fn seq(&self) -> u64;

    fn attempt(&self) -> u32;

    /// Start the current attempt; the caller has already reserved its slot
    fn start(self: Box<Self>, shared: Arc<Shared>);

    /// Settle without running again
    fn reject(self: Box<Self>, reason: Rejection);
}

/// A submission waiting for a slot
pub(crate) struct QueuedSubmission {
    pub(crate) queued_at: Instant,
    pub(crate) job: Box<dyn Pending>,
}

impl QueuedSubmission {
    pub(crate) fn new(job: Box<dyn Pending>) -> Self {
        Self {
            queued_at: Instant::now(),
            job,
        }
    }
}

/// An attempt currently holding a slot
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunningAttempt {
    pub(crate) attempt: u32,
    pub(crate) started_at: Instant,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_attempts: u64,
    pub total_retries: u64,
    pub total_timeouts: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub total_cancelled: u64,
    pub total_wait_time_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_active: usize,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone)]
pub struct QueueState {
    pub active: usize,
    pub queued: usize,
    pub closed: bool,
    pub stats: SchedulerStats,
}

/// One submission as listed by [`super::Scheduler::queue_details`]
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub seq: u64,
    pub attempt: u32,
    pub status: QueueEntryStatus,
    pub wait_time: Duration,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Queued,
}
