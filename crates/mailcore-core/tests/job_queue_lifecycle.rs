use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use mailcore_core::config::SchedulerConfig;
use mailcore_core::models::{CoreErrorKind, JobId, JobInput, JobKind, JobStatus, WorkOutcome};
use mailcore_core::scheduler::{
    JobQueue, JobRequest, JobScheduler, WorkFuture, Worker, WorkerContext,
};

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

fn fast_retries(max_attempts: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_attempts,
        retry_backoff_ms: 5,
        ..SchedulerConfig::default()
    }
}

fn request() -> JobRequest {
    JobRequest::new(JobKind::CreateContact, JobInput::new().with_long("contact_db_id", 1))
}

struct ScriptedWorker {
    outcomes: Mutex<VecDeque<WorkOutcome>>,
    calls: AtomicU32,
    seen_attempts: Mutex<Vec<u32>>,
}

impl ScriptedWorker {
    fn new(outcomes: impl IntoIterator<Item = WorkOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: AtomicU32::new(0),
            seen_attempts: Mutex::new(Vec::new()),
        })
    }
}

impl Worker for ScriptedWorker {
    fn kind(&self) -> JobKind {
        JobKind::CreateContact
    }

    fn execute(&self, context: WorkerContext) -> WorkFuture<'_> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_attempts.lock().unwrap().push(context.attempt);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(WorkOutcome::Retry)
        })
    }
}

struct SlowWorker {
    finished: Arc<AtomicBool>,
}

impl Worker for SlowWorker {
    fn kind(&self) -> JobKind {
        JobKind::CreateContact
    }

    fn execute(&self, _context: WorkerContext) -> WorkFuture<'_> {
        let finished = self.finished.clone();
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            finished.store(true, Ordering::SeqCst);
            WorkOutcome::Success
        })
    }
}

struct PanickingWorker;

impl Worker for PanickingWorker {
    fn kind(&self) -> JobKind {
        JobKind::CreateContact
    }

    fn execute(&self, _context: WorkerContext) -> WorkFuture<'_> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> WorkOutcome {
    panic!("simulated worker panic")
}

#[tokio::test]
async fn successful_job_passes_through_running_to_succeeded() {
    let worker = ScriptedWorker::new([WorkOutcome::Success]);
    let queue = JobQueue::new(fast_retries(3), [worker.clone() as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();
    let mut observer = queue.observe(handle.id()).unwrap();
    let saw_running = tokio::spawn(async move {
        let first_change = observer
            .wait_for(|status| *status != JobStatus::Queued)
            .await
            .map(|status| *status);
        first_change
    });

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Succeeded);
    let first_change = saw_running.await.unwrap().unwrap();
    assert!(matches!(first_change, JobStatus::Running | JobStatus::Succeeded));

    let snapshot = queue.snapshot(handle.id()).unwrap();
    assert_eq!(snapshot.attempts, 1);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.finished_at.is_some());
    assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_outcome_is_terminal_without_retry() {
    let worker = ScriptedWorker::new([WorkOutcome::Failure, WorkOutcome::Success]);
    let queue = JobQueue::new(fast_retries(3), [worker.clone() as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Failed);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_reruns_same_job_until_success() {
    let worker = ScriptedWorker::new([WorkOutcome::Retry, WorkOutcome::Retry, WorkOutcome::Success]);
    let queue = JobQueue::new(fast_retries(5), [worker.clone() as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Succeeded);
    assert_eq!(*worker.seen_attempts.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(queue.snapshot(handle.id()).unwrap().attempts, 3);
}

#[tokio::test]
async fn exhausted_retry_budget_fails_job() {
    let worker = ScriptedWorker::new([]);
    let queue = JobQueue::new(fast_retries(3), [worker.clone() as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Failed);
    assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn panicking_worker_fails_job() {
    let queue = JobQueue::new(fast_retries(3), [Arc::new(PanickingWorker) as Arc<dyn Worker>])
        .unwrap();

    let mut handle = queue.submit(request()).unwrap();

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Failed);
}

#[tokio::test]
async fn cancelling_running_job_aborts_worker() {
    let finished = Arc::new(AtomicBool::new(false));
    let worker = Arc::new(SlowWorker {
        finished: finished.clone(),
    });
    let queue = JobQueue::new(fast_retries(3), [worker as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();
    let mut observer = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        observer.wait_for(|status| *status == JobStatus::Running),
    )
    .await
    .unwrap()
    .unwrap();

    queue.cancel(handle.id()).unwrap();

    assert_eq!(handle.wait_for_terminal(WAIT).await.unwrap(), JobStatus::Cancelled);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(queue.snapshot(handle.id()).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn handle_reports_transition_to_running() {
    let worker = Arc::new(SlowWorker {
        finished: Arc::new(AtomicBool::new(false)),
    });
    let queue = JobQueue::new(fast_retries(3), [worker as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();
    let next = tokio::time::timeout(Duration::from_secs(2), handle.changed())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(next, JobStatus::Running);
    assert_eq!(queue.snapshot(handle.id()).unwrap().attempts, 1);
    queue.cancel(handle.id()).unwrap();
    assert_eq!(handle.status(), JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_finished_job_keeps_terminal_status() {
    let worker = ScriptedWorker::new([WorkOutcome::Success]);
    let queue = JobQueue::new(fast_retries(3), [worker as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();
    handle.wait_for_terminal(WAIT).await.unwrap();

    queue.cancel(handle.id()).unwrap();
    assert_eq!(handle.status(), JobStatus::Succeeded);
}

#[tokio::test]
async fn submitting_kind_without_worker_is_rejected() {
    let queue = JobQueue::new(fast_retries(3), Vec::<Arc<dyn Worker>>::new()).unwrap();

    let error = queue.submit(request()).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(!queue.has_worker(JobKind::CreateContact));
}

#[tokio::test]
async fn duplicate_worker_registration_is_rejected() {
    let first = ScriptedWorker::new([]) as Arc<dyn Worker>;
    let second = ScriptedWorker::new([]) as Arc<dyn Worker>;

    let error = JobQueue::new(fast_retries(3), [first, second]).err().unwrap();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[tokio::test]
async fn zero_attempt_budget_is_rejected() {
    let error = JobQueue::new(fast_retries(0), Vec::<Arc<dyn Worker>>::new())
        .err()
        .unwrap();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
}

#[tokio::test]
async fn unknown_job_ids_are_not_found() {
    let queue = JobQueue::new(fast_retries(3), Vec::<Arc<dyn Worker>>::new()).unwrap();

    assert_eq!(
        queue.observe(JobId(99)).unwrap_err().kind,
        CoreErrorKind::NotFound
    );
    assert_eq!(queue.cancel(JobId(99)).unwrap_err().kind, CoreErrorKind::NotFound);
    assert_eq!(queue.snapshot(JobId(99)).unwrap_err().kind, CoreErrorKind::NotFound);
}

#[tokio::test]
async fn waiting_on_slow_job_times_out() {
    let worker = Arc::new(SlowWorker {
        finished: Arc::new(AtomicBool::new(false)),
    });
    let queue = JobQueue::new(fast_retries(3), [worker as Arc<dyn Worker>]).unwrap();

    let mut handle = queue.submit(request()).unwrap();
    let error = handle
        .wait_for_terminal(Some(Duration::from_millis(30)))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert_eq!(error.job, Some(handle.id()));
    queue.cancel(handle.id()).unwrap();
}

#[test]
fn queue_requires_tokio_runtime() {
    let error = JobQueue::new(fast_retries(3), Vec::<Arc<dyn Worker>>::new())
        .err()
        .unwrap();
    assert_eq!(error.kind, CoreErrorKind::Internal);
}
