pub mod address_key;
pub mod contact;
pub mod error;
pub mod job;
pub mod job_input;

pub use address_key::{AddressKey, AddressKeyId, AddressKeyResponse, AddressKeys};
pub use contact::{ContactDbId, ContactEmail, ContactRecord, NewContact};
pub use error::{AddressKeysError, CoreError, CoreErrorKind};
pub use job::{JobId, JobKind, JobRecord, JobStatus, WorkOutcome};
pub use job_input::{JobInput, JobInputValue};
