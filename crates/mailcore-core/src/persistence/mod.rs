use crate::models::{
    ContactDbId, ContactEmail, ContactRecord, CoreError, JobId, JobRecord, NewContact,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait ContactStore: Send + Sync {
    fn insert_contact(&self, contact: &NewContact) -> PersistenceResult<ContactDbId>;

    fn insert_contact_emails(
        &self,
        db_id: ContactDbId,
        emails: &[ContactEmail],
    ) -> PersistenceResult<()>;

    /// Stores a contact and its emails atomically; nothing is kept on failure.
    fn insert_contact_with_emails(
        &self,
        contact: &NewContact,
        emails: &[ContactEmail],
    ) -> PersistenceResult<ContactRecord>;

    fn find_contact(&self, db_id: ContactDbId) -> PersistenceResult<Option<ContactRecord>>;

    fn list_contact_emails(&self, db_id: ContactDbId) -> PersistenceResult<Vec<ContactEmail>>;
}

pub trait JobStore: Send + Sync {
    fn create_job(&self, job: &JobRecord) -> PersistenceResult<()>;

    fn update_job(&self, job: &JobRecord) -> PersistenceResult<()>;

    fn find_job(&self, job_id: JobId) -> PersistenceResult<Option<JobRecord>>;

    fn list_recent_jobs(&self, limit: usize) -> PersistenceResult<Vec<JobRecord>>;

    fn list_unfinished_jobs(&self) -> PersistenceResult<Vec<JobRecord>>;

    fn next_job_id(&self) -> PersistenceResult<u64>;
}
