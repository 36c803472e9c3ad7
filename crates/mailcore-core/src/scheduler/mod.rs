pub mod handle;
pub mod queue;
pub mod worker;

pub use handle::JobHandle;
pub use queue::{JobQueue, JobSnapshot};
pub use worker::{JobCancellationToken, WorkFuture, Worker, WorkerContext};

use tokio::sync::watch;

use crate::models::{CoreError, JobId, JobInput, JobKind, JobStatus};

pub type OrchestrationResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub input: JobInput,
}

impl JobRequest {
    pub fn new(kind: JobKind, input: JobInput) -> Self {
        Self { kind, input }
    }
}

/// Background job execution as seen by code that only submits and watches jobs.
///
/// `submit` must not block: it registers the job and hands back a handle whose
/// status the scheduler keeps updating as the job progresses.
pub trait JobScheduler: Send + Sync {
    fn submit(&self, request: JobRequest) -> OrchestrationResult<JobHandle>;

    fn observe(&self, job_id: JobId) -> OrchestrationResult<watch::Receiver<JobStatus>>;

    fn cancel(&self, job_id: JobId) -> OrchestrationResult<()>;
}
