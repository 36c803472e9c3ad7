pub mod create_contact;

pub use create_contact::{
    CreateContactWorker, KEY_CONTACT_DB_ID, KEY_CONTACT_EMAILS, create_contact_input,
    decode_contact_emails, enqueue_create_contact,
};
