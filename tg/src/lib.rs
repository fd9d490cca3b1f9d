//! taskgate - bounded-concurrency task scheduling with timeout and retry
//!
//! Submit fallible async tasks to a [`Scheduler`]; each one runs under a
//! shared concurrency cap, every attempt is raced against an optional
//! timeout, and failures are retried with backoff until the retry policy
//! gives up.
//!
//! # Core Concepts
//!
//! - **Slots**: at most `concurrency-limit` attempts run at once, admitted FIFO
//! - **Soft timeouts**: a timed-out attempt fails, but its body is left to finish unobserved
//! - **Backoff off-slot**: a submission waiting to retry does not hold a slot
//! - **Single settlement**: every [`Handle`] resolves exactly once
//!
//! # Modules
//!
//! - [`scheduler`] - Scheduler, handles, retry policy and timeout guard
//! - [`config`] - Configuration types and loading
//! - [`logging`] - Subscriber setup

pub mod config;
pub mod logging;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use scheduler::{
    Backoff, ConfigError, Handle, QueueEntry, QueueEntryStatus, QueueState, RetryConfig, RetryPolicy, Scheduler,
    SchedulerConfig, SchedulerError, SchedulerStats, SharedHandle,
};
pub use scheduler::retry::retry;
pub use scheduler::timeout::with_timeout;
