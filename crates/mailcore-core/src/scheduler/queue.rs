use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::config::SchedulerConfig;
use crate::models::{
    CoreError, CoreErrorKind, JobId, JobInput, JobKind, JobRecord, JobStatus, WorkOutcome,
};
use crate::persistence::JobStore;
use crate::scheduler::{
    JobCancellationToken, JobHandle, JobRequest, JobScheduler, OrchestrationResult, Worker,
    WorkerContext,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input: JobInput,
    pub attempts: u32,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl JobSnapshot {
    fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id,
            kind: self.kind,
            status: self.status,
            input: self.input.clone(),
            attempts: self.attempts,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Tokio-backed [`JobScheduler`].
///
/// Each job runs on its own task; retries re-run the same job id after a
/// linear backoff. When a [`JobStore`] is attached every status transition is
/// written through so unfinished jobs can be resumed after a restart, and
/// finished jobs can optionally be evicted from memory once stored.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: SchedulerConfig,
    runtime: Handle,
    workers: HashMap<JobKind, Arc<dyn Worker>>,
    job_store: Option<Arc<dyn JobStore>>,
    state: Mutex<QueueState>,
    persist_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct QueueState {
    next_job_id: u64,
    jobs: HashMap<JobId, JobEntry>,
}

struct JobEntry {
    snapshot: JobSnapshot,
    status_tx: watch::Sender<JobStatus>,
    cancel_flag: Arc<AtomicBool>,
    abort_handle: Option<AbortHandle>,
    persisted: bool,
}

enum AttemptResolution {
    Finished,
    RetryAfter(Duration),
}

impl JobQueue {
    pub fn new(
        config: SchedulerConfig,
        workers: impl IntoIterator<Item = Arc<dyn Worker>>,
    ) -> OrchestrationResult<Self> {
        Self::with_job_store_option(config, workers, None)
    }

    pub fn with_job_store(
        config: SchedulerConfig,
        workers: impl IntoIterator<Item = Arc<dyn Worker>>,
        job_store: Arc<dyn JobStore>,
    ) -> OrchestrationResult<Self> {
        Self::with_job_store_option(config, workers, Some(job_store))
    }

    fn with_job_store_option(
        config: SchedulerConfig,
        workers: impl IntoIterator<Item = Arc<dyn Worker>>,
        job_store: Option<Arc<dyn JobStore>>,
    ) -> OrchestrationResult<Self> {
        if config.max_attempts == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "scheduler max_attempts must be at least 1",
            ));
        }

        let runtime = Handle::try_current().map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("job queue must be created inside a tokio runtime: {error}"),
            )
        })?;

        let mut mapped = HashMap::new();
        for worker in workers {
            let kind = worker.kind();
            if mapped.insert(kind, worker).is_some() {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("duplicate worker registration for job kind '{}'", kind.as_str()),
                ));
            }
        }

        let next_job_id = match &job_store {
            Some(store) => store.next_job_id()?,
            None => 0,
        };

        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                runtime,
                workers: mapped,
                job_store,
                state: Mutex::new(QueueState {
                    next_job_id,
                    jobs: HashMap::new(),
                }),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn has_worker(&self, kind: JobKind) -> bool {
        self.inner.workers.contains_key(&kind)
    }

    pub fn snapshot(&self, job_id: JobId) -> OrchestrationResult<JobSnapshot> {
        let state = self.inner.lock_state()?;
        state
            .jobs
            .get(&job_id)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| job_lookup_error(job_id))
    }

    /// Re-submits persisted jobs that never reached a terminal status, keeping
    /// their ids and attempt counts.
    pub async fn resume_unfinished(&self) -> OrchestrationResult<Vec<JobHandle>> {
        let Some(store) = self.inner.job_store.clone() else {
            return Ok(Vec::new());
        };

        let records = tokio::task::spawn_blocking(move || store.list_unfinished_jobs())
            .await
            .map_err(|join_error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("job store join failure: {join_error}"),
                )
            })??;

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let Some(worker) = self.inner.workers.get(&record.kind).cloned() else {
                tracing::warn!(
                    job_id = record.id.0,
                    kind = record.kind.as_str(),
                    "no worker registered for persisted job; leaving it untouched"
                );
                continue;
            };

            let receiver = {
                let mut state = self.inner.lock_state()?;
                if state.jobs.contains_key(&record.id) {
                    continue;
                }
                state.next_job_id = state.next_job_id.max(record.id.0.saturating_add(1));
                let snapshot = JobSnapshot {
                    id: record.id,
                    kind: record.kind,
                    status: JobStatus::Queued,
                    input: record.input,
                    attempts: record.attempts,
                    created_at: record.created_at,
                    started_at: None,
                    finished_at: None,
                };
                insert_entry(&mut state, snapshot, true)
            };

            tracing::info!(
                job_id = record.id.0,
                kind = record.kind.as_str(),
                attempts = record.attempts,
                "resuming unfinished job"
            );
            self.spawn_driver(record.id, worker);
            handles.push(JobHandle::new(record.id, receiver));
        }

        Ok(handles)
    }

    fn spawn_driver(&self, job_id: JobId, worker: Arc<dyn Worker>) {
        let inner = self.inner.clone();
        self.inner.runtime.spawn(drive_job(inner, job_id, worker));
    }
}

impl JobScheduler for JobQueue {
    fn submit(&self, request: JobRequest) -> OrchestrationResult<JobHandle> {
        let worker = self
            .inner
            .workers
            .get(&request.kind)
            .cloned()
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!(
                        "no worker is registered for job kind '{}'",
                        request.kind.as_str()
                    ),
                )
            })?;

        let (job_id, receiver) = {
            let mut state = self.inner.lock_state()?;
            let job_id = JobId(state.next_job_id);
            state.next_job_id = state.next_job_id.saturating_add(1);

            let snapshot = JobSnapshot {
                id: job_id,
                kind: request.kind,
                status: JobStatus::Queued,
                input: request.input,
                attempts: 0,
                created_at: SystemTime::now(),
                started_at: None,
                finished_at: None,
            };
            (job_id, insert_entry(&mut state, snapshot, false))
        };

        tracing::debug!(
            job_id = job_id.0,
            kind = request.kind.as_str(),
            "job enqueued"
        );
        self.spawn_driver(job_id, worker);
        Ok(JobHandle::new(job_id, receiver))
    }

    fn observe(&self, job_id: JobId) -> OrchestrationResult<watch::Receiver<JobStatus>> {
        let state = self.inner.lock_state()?;
        state
            .jobs
            .get(&job_id)
            .map(|entry| entry.status_tx.subscribe())
            .ok_or_else(|| job_lookup_error(job_id))
    }

    fn cancel(&self, job_id: JobId) -> OrchestrationResult<()> {
        {
            let mut state = self.inner.lock_state()?;
            let entry = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| job_lookup_error(job_id))?;
            if entry.snapshot.status.is_terminal() {
                return Ok(());
            }

            entry.cancel_flag.store(true, Ordering::SeqCst);
            if let Some(handle) = entry.abort_handle.take() {
                handle.abort();
            }
            transition(entry, JobStatus::Cancelled);
        }

        tracing::info!(job_id = job_id.0, "job cancelled");
        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(async move { persist_job(&inner, job_id).await });
        Ok(())
    }
}

impl QueueInner {
    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| {
            CoreError::new(CoreErrorKind::Internal, "job queue mutex poisoned")
        })
    }

    /// Moves a queued job to running; `None` when it was cancelled meanwhile.
    fn begin_attempt(&self, job_id: JobId) -> Option<WorkerContext> {
        let mut state = self.lock_state().ok()?;
        let entry = state.jobs.get_mut(&job_id)?;
        if entry.snapshot.status.is_terminal() || entry.cancel_flag.load(Ordering::SeqCst) {
            return None;
        }

        entry.snapshot.attempts = entry.snapshot.attempts.saturating_add(1);
        if entry.snapshot.started_at.is_none() {
            entry.snapshot.started_at = Some(SystemTime::now());
        }
        transition(entry, JobStatus::Running);

        Some(WorkerContext {
            job_id,
            attempt: entry.snapshot.attempts,
            input: entry.snapshot.input.clone(),
            cancellation: JobCancellationToken::new(entry.cancel_flag.clone()),
        })
    }

    fn set_abort_handle(&self, job_id: JobId, handle: AbortHandle) {
        if let Ok(mut state) = self.lock_state()
            && let Some(entry) = state.jobs.get_mut(&job_id)
        {
            if entry.cancel_flag.load(Ordering::SeqCst) {
                handle.abort();
            } else {
                entry.abort_handle = Some(handle);
            }
        }
    }

    fn finish_attempt(&self, job_id: JobId, outcome: WorkOutcome) -> AttemptResolution {
        let Ok(mut state) = self.lock_state() else {
            return AttemptResolution::Finished;
        };
        let Some(entry) = state.jobs.get_mut(&job_id) else {
            return AttemptResolution::Finished;
        };
        entry.abort_handle = None;

        if entry.snapshot.status.is_terminal() {
            return AttemptResolution::Finished;
        }
        if entry.cancel_flag.load(Ordering::SeqCst) {
            transition(entry, JobStatus::Cancelled);
            return AttemptResolution::Finished;
        }

        let attempts = entry.snapshot.attempts;
        match outcome {
            WorkOutcome::Success => transition(entry, JobStatus::Succeeded),
            WorkOutcome::Failure => transition(entry, JobStatus::Failed),
            WorkOutcome::Retry if attempts < self.config.max_attempts => {
                transition(entry, JobStatus::Queued);
                return AttemptResolution::RetryAfter(
                    self.config.retry_backoff().saturating_mul(attempts),
                );
            }
            WorkOutcome::Retry => {
                tracing::warn!(
                    job_id = job_id.0,
                    attempts,
                    "job retry budget exhausted"
                );
                transition(entry, JobStatus::Failed);
            }
        }
        AttemptResolution::Finished
    }

    fn record(&self, job_id: JobId) -> Option<(JobRecord, bool)> {
        let state = self.lock_state().ok()?;
        let entry = state.jobs.get(&job_id)?;
        Some((entry.snapshot.to_record(), entry.persisted))
    }

    fn evict(&self, job_id: JobId) {
        if let Ok(mut state) = self.lock_state()
            && state
                .jobs
                .get(&job_id)
                .is_some_and(|entry| entry.snapshot.status.is_terminal())
        {
            state.jobs.remove(&job_id);
            tracing::debug!(job_id = job_id.0, "evicted finished job");
        }
    }

    fn mark_persisted(&self, job_id: JobId) {
        if let Ok(mut state) = self.lock_state()
            && let Some(entry) = state.jobs.get_mut(&job_id)
        {
            entry.persisted = true;
        }
    }
}

async fn drive_job(inner: Arc<QueueInner>, job_id: JobId, worker: Arc<dyn Worker>) {
    let kind = worker.kind();
    persist_job(&inner, job_id).await;

    loop {
        let Some(context) = inner.begin_attempt(job_id) else {
            break;
        };
        let attempt = context.attempt;
        persist_job(&inner, job_id).await;
        tracing::info!(
            job_id = job_id.0,
            kind = kind.as_str(),
            attempt,
            "job attempt started"
        );

        let attempt_worker = worker.clone();
        let attempt_task = inner
            .runtime
            .spawn(async move { attempt_worker.execute(context).await });
        inner.set_abort_handle(job_id, attempt_task.abort_handle());

        let outcome = match attempt_task.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_cancelled() => {
                tracing::debug!(job_id = job_id.0, attempt, "job attempt aborted");
                break;
            }
            Err(join_error) => {
                tracing::error!(
                    job_id = job_id.0,
                    kind = kind.as_str(),
                    attempt,
                    error = %join_error,
                    "worker panicked; failing job"
                );
                WorkOutcome::Failure
            }
        };

        let resolution = inner.finish_attempt(job_id, outcome);
        persist_job(&inner, job_id).await;

        match resolution {
            AttemptResolution::Finished => {
                tracing::info!(
                    job_id = job_id.0,
                    kind = kind.as_str(),
                    attempt,
                    outcome = ?outcome,
                    "job finished"
                );
                break;
            }
            AttemptResolution::RetryAfter(backoff) => {
                tracing::info!(
                    job_id = job_id.0,
                    kind = kind.as_str(),
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "job scheduled for retry"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Writes the latest snapshot of `job_id` to the job store, if one is attached.
/// Store failures are logged and never change the job outcome.
async fn persist_job(inner: &Arc<QueueInner>, job_id: JobId) {
    let Some(store) = inner.job_store.clone() else {
        return;
    };

    let _guard = inner.persist_lock.lock().await;
    let Some((record, persisted)) = inner.record(job_id) else {
        return;
    };
    let status = record.status;

    let result = tokio::task::spawn_blocking(move || {
        if persisted {
            store.update_job(&record)
        } else {
            store.create_job(&record)
        }
    })
    .await;

    match result {
        Ok(Ok(())) => {
            if inner.config.evict_finished_jobs && status.is_terminal() {
                inner.evict(job_id);
            } else if !persisted {
                inner.mark_persisted(job_id);
            }
        }
        Ok(Err(error)) => {
            tracing::error!(
                job_id = job_id.0,
                kind = ?error.kind,
                message = %error.message,
                "failed to persist job record"
            );
        }
        Err(join_error) => {
            tracing::error!(
                job_id = job_id.0,
                error = %join_error,
                "job persistence task failed"
            );
        }
    }
}

fn insert_entry(
    state: &mut QueueState,
    snapshot: JobSnapshot,
    persisted: bool,
) -> watch::Receiver<JobStatus> {
    let (status_tx, receiver) = watch::channel(snapshot.status);
    state.jobs.insert(
        snapshot.id,
        JobEntry {
            snapshot,
            status_tx,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            abort_handle: None,
            persisted,
        },
    );
    receiver
}

fn transition(entry: &mut JobEntry, status: JobStatus) {
    entry.snapshot.status = status;
    if status.is_terminal() {
        entry.snapshot.finished_at = Some(SystemTime::now());
    }
    entry.status_tx.send_replace(status);
}

fn job_lookup_error(job_id: JobId) -> CoreError {
    CoreError::for_job(
        job_id,
        CoreErrorKind::NotFound,
        format!("unknown job id '{}'", job_id.0),
    )
}
