//! Job records, states and handles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::AppError;

/// Which queue a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Shorten,
    Redirect,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Shorten => "shorten",
            JobKind::Redirect => "redirect",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// `waiting → active → (completed | delayed → waiting … | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    /// A failed attempt waiting out its backoff.
    Delayed,
    Completed,
    /// Terminal: no further attempts.
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Outcome shared with every handle awaiting a job.
pub(crate) type Outcome<O> = Option<Result<O, AppError>>;

/// Point-in-time view of a job for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus<O> {
    pub job_id: u64,
    pub kind: JobKind,
    pub state: JobState,
    /// 0 while waiting, 50 while running, 100 when finished.
    pub progress: u8,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<O>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Caller's view of an enqueued job.
///
/// Several handles may observe the same job when submissions were
/// deduplicated.
#[derive(Debug)]
pub struct JobHandle<O> {
    job_id: u64,
    deduplicated: bool,
    rx: watch::Receiver<Outcome<O>>,
}

impl<O: Clone> JobHandle<O> {
    pub(crate) fn new(job_id: u64, deduplicated: bool, rx: watch::Receiver<Outcome<O>>) -> Self {
        Self {
            job_id,
            deduplicated,
            rx,
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Whether this handle joined an already queued identical job.
    pub fn is_deduplicated(&self) -> bool {
        self.deduplicated
    }

    /// Waits for the job to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Timeout`] when `timeout` elapses first. The job is
    /// not cancelled and its result stays available through the queue's
    /// status lookup while retained.
    pub async fn await_result(mut self, timeout: Duration) -> Result<O, AppError> {
        let job_id = self.job_id;
        let waited = tokio::time::timeout(timeout, self.rx.wait_for(Option::is_some)).await;

        match waited {
            Ok(Ok(outcome)) => match &*outcome {
                Some(result) => result.clone(),
                None => Err(AppError::internal(
                    "Job finished without an outcome",
                    serde_json::json!({ "jobId": job_id }),
                )),
            },
            Ok(Err(_)) => Err(AppError::internal(
                "Job was dropped before finishing",
                serde_json::json!({ "jobId": job_id }),
            )),
            Err(_) => Err(AppError::Timeout { job_id }),
        }
    }
}
