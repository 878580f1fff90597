//! Job queue with deduplication, bounded concurrency, retry and an optional
//! durable journal.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, watch};
use tracing::{debug, info, instrument, warn};

use super::job::{JobHandle, JobKind, JobState, JobStatus, Outcome};
use super::journal::JobJournal;
use super::limiter::AdmissionLimiter;
use crate::error::AppError;

/// Job ids are unique across every queue in the process.
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Work performed for each job of a queue.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    /// Journaled as JSON when the queue has a [`JobJournal`].
    type Payload: Clone
        + Eq
        + Hash
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    type Output: Clone + Serialize + Send + Sync + 'static;

    fn kind(&self) -> JobKind;

    async fn process(&self, payload: Self::Payload) -> Result<Self::Output, AppError>;
}

/// Tuning for one queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later one.
    pub backoff_base: Duration,
    /// `(max, period)` admission quota; `None` admits everything.
    pub admission: Option<(u32, Duration)>,
    pub retain_completed: usize,
    pub retain_failed: usize,
}

impl QueueConfig {
    pub fn shorten_defaults() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            admission: Some((8000, Duration::from_millis(3500))),
            retain_completed: 1000,
            retain_failed: 3000,
        }
    }

    pub fn redirect_defaults() -> Self {
        Self {
            concurrency: num_cpus::get().max(1),
            max_attempts: 2,
            backoff_base: Duration::from_millis(250),
            admission: Some((8000, Duration::from_millis(5000))),
            retain_completed: 1000,
            retain_failed: 3000,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Counters reported by [`WorkQueue::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
    pub accepting: bool,
}

struct JobRecord<P, O> {
    payload: P,
    state: JobState,
    attempts: u32,
    result: Option<O>,
    failed_reason: Option<String>,
    created_at: chrono::DateTime<Utc>,
    finished_at: Option<chrono::DateTime<Utc>>,
}

struct JobEntry<P, O> {
    record: Mutex<JobRecord<P, O>>,
    outcome: watch::Sender<Outcome<O>>,
}

struct Inner<J: JobProcessor> {
    processor: J,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
    jobs: DashMap<u64, Arc<JobEntry<J::Payload, J::Output>>>,
    in_flight: DashMap<J::Payload, u64>,
    completed: Mutex<VecDeque<u64>>,
    failed: Mutex<VecDeque<u64>>,
    limiter: Option<AdmissionLimiter>,
    journal: Option<Arc<dyn JobJournal>>,
    accepting: AtomicBool,
    pending: AtomicUsize,
    drained: Notify,
}

/// At-least-once job queue running jobs on the tokio runtime.
///
/// - Submitting a payload identical to a waiting or active job joins it
/// - At most `concurrency` jobs run at once
/// - Retryable failures are retried with exponential backoff
/// - Terminal jobs stay inspectable within a bounded window
/// - With a journal, unfinished payloads are replayed by [`WorkQueue::recover`]
pub struct WorkQueue<J: JobProcessor> {
    inner: Arc<Inner<J>>,
}

impl<J: JobProcessor> Clone for WorkQueue<J> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<J: JobProcessor> WorkQueue<J> {
    pub fn new(processor: J, config: QueueConfig) -> Self {
        Self::with_journal(processor, config, None)
    }

    /// Queue whose pending payloads are also written to `journal`.
    pub fn with_journal(
        processor: J,
        config: QueueConfig,
        journal: Option<Arc<dyn JobJournal>>,
    ) -> Self {
        let limiter = config
            .admission
            .map(|(max, period)| AdmissionLimiter::new(max, period));

        info!(
            queue = %processor.kind(),
            concurrency = config.concurrency,
            max_attempts = config.max_attempts,
            durable = journal.is_some(),
            "Queue started"
        );

        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
                processor,
                config,
                jobs: DashMap::new(),
                in_flight: DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
                failed: Mutex::new(VecDeque::new()),
                limiter,
                journal,
                accepting: AtomicBool::new(true),
                pending: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.inner.processor.kind()
    }

    /// Submits `payload`, or joins the identical job already queued.
    ///
    /// # Errors
    ///
    /// - [`AppError::RateLimited`] when the admission quota is exhausted
    /// - [`AppError::Internal`] after [`WorkQueue::shutdown`]
    pub fn enqueue(&self, payload: J::Payload) -> Result<JobHandle<J::Output>, AppError> {
        self.submit(payload, true)
    }

    /// Re-submits every payload the journal still holds for this queue.
    ///
    /// Replayed jobs skip admission control and have no waiting caller; their
    /// effects land in the store and caches. Unreadable entries are dropped.
    /// Returns how many jobs were submitted.
    pub async fn recover(&self) -> usize {
        let Some(journal) = &self.inner.journal else {
            return 0;
        };
        let kind = self.kind();

        let pending = match journal.pending(kind).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(queue = %kind, error = %e, "Failed to read job journal");
                return 0;
            }
        };

        let mut recovered = 0;
        for raw in pending {
            match serde_json::from_str::<J::Payload>(&raw) {
                Ok(payload) => match self.submit(payload, false) {
                    Ok(_) => recovered += 1,
                    Err(e) => warn!(queue = %kind, error = %e, "Failed to replay job"),
                },
                Err(e) => {
                    warn!(queue = %kind, error = %e, payload = %raw, "Dropping unreadable journal entry");
                    if let Err(e) = journal.complete(kind, &raw).await {
                        warn!(queue = %kind, error = %e, "Failed to drop journal entry");
                    }
                }
            }
        }

        if recovered > 0 {
            info!(queue = %kind, recovered, "Replayed pending jobs");
        }
        recovered
    }

    fn submit(&self, payload: J::Payload, admit: bool) -> Result<JobHandle<J::Output>, AppError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::SeqCst) {
            return Err(AppError::internal(
                "Queue is shutting down",
                json!({ "queue": self.kind().as_str() }),
            ));
        }

        let entry = match inner.in_flight.entry(payload.clone()) {
            Entry::Occupied(existing) => {
                let job_id = *existing.get();
                if let Some(job) = inner.jobs.get(&job_id) {
                    debug!(queue = %self.kind(), job_id, "Joined in-flight job");
                    return Ok(JobHandle::new(job_id, true, job.outcome.subscribe()));
                }
                // Stale marker from an evicted job.
                Entry::Occupied(existing)
            }
            vacant => vacant,
        };

        if admit
            && let Some(limiter) = &inner.limiter
            && let Err(retry_after) = limiter.check()
        {
            if let Entry::Occupied(stale) = entry {
                stale.remove();
            }
            return Err(AppError::rate_limited(
                format!("{} queue is at capacity", self.kind()),
                retry_after,
            ));
        }

        let job_id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let job = Arc::new(JobEntry {
            record: Mutex::new(JobRecord {
                payload: payload.clone(),
                state: JobState::Waiting,
                attempts: 0,
                result: None,
                failed_reason: None,
                created_at: Utc::now(),
                finished_at: None,
            }),
            outcome: tx,
        });

        inner.jobs.insert(job_id, job.clone());
        drop(entry.insert(job_id));
        inner.pending.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(run_job(self.inner.clone(), job_id, job, payload));

        Ok(JobHandle::new(job_id, false, rx))
    }

    /// Snapshot of a retained job.
    pub fn status(&self, job_id: u64) -> Option<JobStatus<J::Output>> {
        let job = self.inner.jobs.get(&job_id)?.clone();
        let record = job.record.lock().ok()?;

        let progress = match record.state {
            JobState::Waiting => 0,
            JobState::Active | JobState::Delayed => 50,
            JobState::Completed | JobState::Failed => 100,
        };

        Some(JobStatus {
            job_id,
            kind: self.kind(),
            state: record.state,
            progress,
            attempts: record.attempts,
            result: record.result.clone(),
            failed_reason: record.failed_reason.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
        })
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            accepting: self.inner.accepting.load(Ordering::SeqCst),
            ..QueueStats::default()
        };

        for job in self.inner.jobs.iter() {
            let Ok(record) = job.record.lock() else {
                continue;
            };
            match record.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Delayed => stats.delayed += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Stops admission and waits up to `grace` for submitted jobs to finish.
    ///
    /// Returns `true` if every job finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::SeqCst);
        info!(queue = %self.kind(), "Queue draining");

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.inner.drained.notified();
                if self.inner.pending.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                queue = %self.kind(),
                pending = self.inner.pending.load(Ordering::SeqCst),
                "Queue shutdown timed out with jobs still running"
            );
        }
        drained
    }
}

#[instrument(skip_all, fields(queue = %inner.processor.kind(), job_id = job_id))]
async fn run_job<J: JobProcessor>(
    inner: Arc<Inner<J>>,
    job_id: u64,
    job: Arc<JobEntry<J::Payload, J::Output>>,
    payload: J::Payload,
) {
    let max_attempts = inner.config.max_attempts.max(1);
    let mut attempt = 0;

    write_journal(&*inner, &payload, JournalOp::Record).await;

    let outcome = loop {
        attempt += 1;

        let permit = match inner.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                break Err(AppError::internal(
                    "Queue closed",
                    json!({ "jobId": job_id }),
                ));
            }
        };

        update(&*job, |r| {
            r.state = JobState::Active;
            r.attempts = attempt;
        });

        let result = inner.processor.process(payload.clone()).await;
        drop(permit);

        match result {
            Ok(output) => break Ok(output),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => break Err(e),
            Err(e) => {
                let delay = inner.config.backoff(attempt);
                counter!("jobs_retried_total", "queue" => inner.processor.kind().as_str())
                    .increment(1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying job");

                update(&*job, |r| r.state = JobState::Delayed);
                tokio::time::sleep(delay).await;
                update(&*job, |r| r.state = JobState::Waiting);
            }
        }
    };

    // Erased before the in-flight marker goes, so an identical resubmission
    // records after this.
    write_journal(&*inner, &payload, JournalOp::Complete).await;
    finish(&*inner, job_id, &*job, outcome);
}

#[derive(Debug, Clone, Copy)]
enum JournalOp {
    Record,
    Complete,
}

/// Best-effort journal write; failures are logged and the job proceeds.
async fn write_journal<J: JobProcessor>(inner: &Inner<J>, payload: &J::Payload, op: JournalOp) {
    let Some(journal) = &inner.journal else {
        return;
    };
    let kind = inner.processor.kind();

    let result = match serde_json::to_string(payload) {
        Ok(raw) => match op {
            JournalOp::Record => journal.record(kind, &raw).await,
            JournalOp::Complete => journal.complete(kind, &raw).await,
        },
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        warn!(error = %e, ?op, "Job journal write failed");
    }
}

fn update<P, O>(job: &JobEntry<P, O>, f: impl FnOnce(&mut JobRecord<P, O>)) {
    if let Ok(mut record) = job.record.lock() {
        f(&mut record);
    }
}

fn finish<J: JobProcessor>(
    inner: &Inner<J>,
    job_id: u64,
    job: &JobEntry<J::Payload, J::Output>,
    outcome: Result<J::Output, AppError>,
) {
    let kind = inner.processor.kind().as_str();
    let succeeded = outcome.is_ok();

    let payload = match job.record.lock() {
        Ok(mut record) => {
            record.finished_at = Some(Utc::now());
            match &outcome {
                Ok(output) => {
                    record.state = JobState::Completed;
                    record.result = Some(output.clone());
                }
                Err(e) => {
                    record.state = JobState::Failed;
                    record.failed_reason = Some(e.to_string());
                }
            }
            Some(record.payload.clone())
        }
        Err(_) => None,
    };

    if let Some(payload) = payload {
        inner
            .in_flight
            .remove_if(&payload, |_, in_flight_id| *in_flight_id == job_id);
    }

    if succeeded {
        counter!("jobs_completed_total", "queue" => kind).increment(1);
    } else {
        counter!("jobs_failed_total", "queue" => kind).increment(1);
        if let Err(e) = &outcome {
            warn!(error = %e, "Job failed");
        }
    }

    job.outcome.send_replace(Some(outcome));

    let (window, cap) = if succeeded {
        (&inner.completed, inner.config.retain_completed)
    } else {
        (&inner.failed, inner.config.retain_failed)
    };
    let evicted: Vec<u64> = match window.lock() {
        Ok(mut ids) => {
            ids.push_back(job_id);
            let excess = ids.len().saturating_sub(cap);
            ids.drain(..excess).collect()
        }
        Err(_) => Vec::new(),
    };
    for id in evicted {
        inner.jobs.remove(&id);
    }

    if inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        inner.drained.notify_waiters();
    }
}
