//! Job queues mediating the shorten and redirect paths.
//!
//! - [`WorkQueue`] - Deduplicating, retrying job queue
//! - [`JobHandle`] - Awaitable view of a submitted job
//! - [`JobJournal`] - Durable record of pending jobs, replayed on restart
//! - [`AdmissionLimiter`] - Reject-not-buffer quota shared with the HTTP limiter

pub mod job;
pub mod journal;
pub mod limiter;
pub mod work_queue;

pub use job::{JobHandle, JobKind, JobState, JobStatus};
pub use journal::{JobJournal, JournalError};
pub use limiter::{AdmissionLimiter, quota, retry_after_secs};
pub use work_queue::{JobProcessor, QueueConfig, QueueStats, WorkQueue};
