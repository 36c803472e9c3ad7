use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::models::{CoreError, CoreErrorKind, JobId, JobStatus};
use crate::scheduler::OrchestrationResult;

/// Read side of a submitted job. Cloning yields another independent observer.
#[derive(Clone, Debug)]
pub struct JobHandle {
    id: JobId,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn new(id: JobId, status: watch::Receiver<JobStatus>) -> Self {
        Self { id, status }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Waits for the next status change and returns the new status.
    pub async fn changed(&mut self) -> OrchestrationResult<JobStatus> {
        self.status
            .changed()
            .await
            .map_err(|_| closed_error(self.id))?;
        Ok(*self.status.borrow_and_update())
    }

    pub async fn wait_for_terminal(
        &mut self,
        timeout_duration: Option<Duration>,
    ) -> OrchestrationResult<JobStatus> {
        let id = self.id;
        let wait = async {
            self.status
                .wait_for(|status| status.is_terminal())
                .await
                .map(|status| *status)
                .map_err(|_| closed_error(id))
        };

        match timeout_duration {
            Some(duration) => timeout(duration, wait).await.map_err(|_| {
                CoreError::for_job(
                    id,
                    CoreErrorKind::Timeout,
                    format!("timed out waiting for job '{}' to finish", id.0),
                )
            })?,
            None => wait.await,
        }
    }
}

fn closed_error(id: JobId) -> CoreError {
    CoreError::for_job(
        id,
        CoreErrorKind::Internal,
        format!("status channel for job '{}' closed", id.0),
    )
}
