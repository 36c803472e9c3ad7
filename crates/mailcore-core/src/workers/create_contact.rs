use std::sync::Arc;

use crate::models::{
    ContactDbId, ContactEmail, ContactRecord, CoreError, CoreErrorKind, JobInput, JobKind,
    WorkOutcome,
};
use crate::persistence::ContactStore;
use crate::scheduler::{
    JobHandle, JobRequest, JobScheduler, OrchestrationResult, WorkFuture, Worker, WorkerContext,
};

pub const KEY_CONTACT_DB_ID: &str = "contact_db_id";
pub const KEY_CONTACT_EMAILS: &str = "contact_emails";

/// Background step that follows local creation of a contact.
///
/// Only a missing contact id fails the job. The looked-up row does not affect
/// the outcome yet: an absent row or a store error is logged and the job
/// still succeeds.
pub struct CreateContactWorker {
    store: Arc<dyn ContactStore>,
}

impl CreateContactWorker {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }
}

impl Worker for CreateContactWorker {
    fn kind(&self) -> JobKind {
        JobKind::CreateContact
    }

    fn execute(&self, context: WorkerContext) -> WorkFuture<'_> {
        Box::pin(async move {
            let db_id = ContactDbId(
                context
                    .input
                    .get_long(KEY_CONTACT_DB_ID, ContactDbId::ABSENT.0),
            );
            if db_id.is_absent() {
                tracing::warn!(
                    job_id = context.job_id.0,
                    "create contact job is missing its contact id"
                );
                return WorkOutcome::Failure;
            }

            if context.cancellation.is_cancelled() {
                tracing::debug!(
                    job_id = context.job_id.0,
                    "create contact job cancelled before lookup"
                );
                return WorkOutcome::Failure;
            }

            let store = self.store.clone();
            let lookup = tokio::task::spawn_blocking(move || store.find_contact(db_id)).await;
            match lookup {
                Ok(Ok(Some(contact))) => {
                    tracing::debug!(
                        job_id = context.job_id.0,
                        contact_db_id = contact.db_id.0,
                        has_server_id = contact.contact_id.is_some(),
                        "loaded contact for create contact job"
                    );
                }
                Ok(Ok(None)) => {
                    tracing::warn!(
                        job_id = context.job_id.0,
                        contact_db_id = db_id.0,
                        "contact row not found"
                    );
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        job_id = context.job_id.0,
                        contact_db_id = db_id.0,
                        kind = ?error.kind,
                        message = %error.message,
                        "contact lookup failed"
                    );
                }
                Err(join_error) => {
                    tracing::warn!(
                        job_id = context.job_id.0,
                        contact_db_id = db_id.0,
                        error = %join_error,
                        "contact lookup task failed"
                    );
                }
            }

            WorkOutcome::Success
        })
    }
}

pub fn create_contact_input(
    contact_db_id: ContactDbId,
    emails: &[ContactEmail],
) -> Result<JobInput, CoreError> {
    let encoded = emails
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("failed to encode contact emails for job input: {error}"),
            )
        })?;

    Ok(JobInput::new()
        .with_long(KEY_CONTACT_DB_ID, contact_db_id.0)
        .with_text_list(KEY_CONTACT_EMAILS, encoded))
}

/// Reads the contact emails back out of a create contact job input. A missing
/// list decodes as empty.
pub fn decode_contact_emails(input: &JobInput) -> Result<Vec<ContactEmail>, CoreError> {
    input
        .get_text_list(KEY_CONTACT_EMAILS)
        .unwrap_or_default()
        .iter()
        .map(|raw| serde_json::from_str(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("malformed contact email in job input: {error}"),
            )
        })
}

/// Builds a one-shot create contact job and submits it.
pub fn enqueue_create_contact(
    scheduler: &dyn JobScheduler,
    contact: &ContactRecord,
    emails: &[ContactEmail],
) -> OrchestrationResult<JobHandle> {
    let input = create_contact_input(contact.db_id, emails)?;
    scheduler.submit(JobRequest::new(JobKind::CreateContact, input))
}
