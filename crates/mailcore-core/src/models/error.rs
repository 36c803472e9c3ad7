use thiserror::Error;

use crate::models::{AddressKeyId, JobId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    NotFound,
    Timeout,
    Cancelled,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub job: Option<JobId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            job: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_job(job: JobId, kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            job: Some(job),
            kind,
            message: message.into(),
        }
    }
}

/// Validation failures raised while assembling an [`crate::models::AddressKeys`] set.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AddressKeysError {
    #[error("primary key '{id}' is not a member of the address key set")]
    PrimaryKeyNotInKeys { id: AddressKeyId },
    #[error("no address key with id '{id}' to use as primary")]
    UnknownPrimaryKeyId { id: AddressKeyId },
}

impl From<AddressKeysError> for CoreError {
    fn from(error: AddressKeysError) -> Self {
        CoreError::new(CoreErrorKind::InvalidInput, error.to_string())
    }
}
