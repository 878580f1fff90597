//! Durable record of submitted jobs.
//!
//! A queue records each job's payload before running it and erases it once
//! the job is terminal. Whatever is left after a crash is replayed by
//! [`super::WorkQueue::recover`] on the next start, so jobs survive a
//! process restart at least once.

use async_trait::async_trait;

use super::job::JobKind;

/// Errors from the journal backend.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Job journal connection error: {0}")]
    Connection(String),
    #[error("Job journal operation error: {0}")]
    Operation(String),
    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JournalResult<T> = Result<T, JournalError>;

/// Pending payloads per queue, stored as JSON.
///
/// Payloads form a set: queues deduplicate identical in-flight payloads, so
/// one entry per payload suffices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobJournal: Send + Sync {
    /// Marks `payload` as pending for `kind`.
    async fn record(&self, kind: JobKind, payload: &str) -> JournalResult<()>;

    /// Clears `payload` once its job is terminal.
    async fn complete(&self, kind: JobKind, payload: &str) -> JournalResult<()>;

    /// Payloads recorded for `kind` and never completed.
    async fn pending(&self, kind: JobKind) -> JournalResult<Vec<String>>;
}

/// Journal key holding the pending set of `kind`.
pub fn pending_key(kind: JobKind) -> String {
    format!("queue:{}:pending", kind)
}
