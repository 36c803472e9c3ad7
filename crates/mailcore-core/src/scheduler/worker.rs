use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::{JobId, JobInput, JobKind, WorkOutcome};

pub type WorkFuture<'a> = Pin<Box<dyn Future<Output = WorkOutcome> + Send + 'a>>;

/// Set by the queue when the job is cancelled; workers poll it between steps.
#[derive(Clone, Debug)]
pub struct JobCancellationToken {
    flag: Arc<AtomicBool>,
}

impl JobCancellationToken {
    pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub job_id: JobId,
    /// 1-based attempt counter.
    pub attempt: u32,
    pub input: JobInput,
    pub cancellation: JobCancellationToken,
}

pub trait Worker: Send + Sync {
    fn kind(&self) -> JobKind;

    fn execute(&self, context: WorkerContext) -> WorkFuture<'_>;
}
