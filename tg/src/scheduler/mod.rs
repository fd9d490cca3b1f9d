//! Scheduler for fallible async tasks
//!
//! Runs submitted tasks under a concurrency limit, guards each attempt
//! with an optional timeout, and retries failures with backoff.

mod config;
mod core;
mod error;
mod handle;
mod queue;
pub mod retry;
pub mod timeout;

pub use config::{ConfigError, RetryConfig, SchedulerConfig};
pub use self::core::Scheduler;
pub use error::SchedulerError;
pub use handle::{Handle, Outcome, SharedHandle};
pub use queue::{QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};
pub use retry::{Backoff, BackoffFn, Decision, RetryPolicy};
