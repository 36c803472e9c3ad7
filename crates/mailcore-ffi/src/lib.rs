use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::str::Utf8Error;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use mailcore_core::config::CoreConfig;
use mailcore_core::logging;
use mailcore_core::models::{
    AddressKey, AddressKeyId, AddressKeyResponse, AddressKeys, ContactDbId, ContactEmail, JobId,
    JobKind, JobStatus, NewContact,
};
use mailcore_core::persistence::{ContactStore, JobStore};
use mailcore_core::scheduler::{JobQueue, JobRequest, JobScheduler, Worker};
use mailcore_core::sqlite::SqliteStore;
use mailcore_core::workers::{CreateContactWorker, create_contact_input, enqueue_create_contact};
use serde::Serialize;

struct CoreState {
    store: Arc<SqliteStore>,
    queue: JobQueue,
    _tokio_rt: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<CoreState>> = Mutex::new(None);
}

#[derive(Serialize)]
struct JobStatusView {
    id: u64,
    kind: JobKind,
    status: JobStatus,
    attempts: u32,
}

#[derive(Serialize)]
struct AddressKeysView<'a> {
    primary_key_id: Option<&'a AddressKeyId>,
    has_keys: bool,
    keys: &'a [AddressKey],
}

/// Initialize the core with a JSON configuration (see `CoreConfig`).
///
/// # Safety
///
/// `config_json` must be a valid, non-null pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mailcore_init(config_json: *const c_char) -> bool {
    let Some(raw) = (unsafe { read_str(config_json) }) else {
        return false;
    };

    let mut guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return false,
    };
    if guard.is_some() {
        return true;
    }

    let mut config = match CoreConfig::from_json(raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse mailcore config: {e}");
            return false;
        }
    };

    logging::init(config.log_filter.as_deref());
    // Finished jobs are answered from the store, so the queue need not keep them.
    config.scheduler.evict_finished_jobs = true;

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to create tokio runtime");
            return false;
        }
    };

    let store = Arc::new(SqliteStore::new(config.database_path.clone()));
    if let Err(e) = store.migrate_to_latest() {
        tracing::error!(error = %e, "failed to migrate database");
        return false;
    }

    let worker = Arc::new(CreateContactWorker::new(store.clone())) as Arc<dyn Worker>;
    let queue = {
        let _entered = rt.enter();
        match JobQueue::with_job_store(config.scheduler.clone(), [worker], store.clone()) {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!(error = %e, "failed to create job queue");
                return false;
            }
        }
    };

    match rt.block_on(queue.resume_unfinished()) {
        Ok(resumed) if !resumed.is_empty() => {
            tracing::info!(count = resumed.len(), "resumed unfinished jobs");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "failed to resume unfinished jobs"),
    }

    *guard = Some(CoreState {
        store,
        queue,
        _tokio_rt: rt,
    });

    true
}

/// Store a contact with its emails and enqueue the create contact job.
/// Returns the job id, or -1 on failure. Nothing is stored when -1 is returned.
///
/// # Safety
///
/// `contact_json` must be a valid NUL-terminated UTF-8 C string. `emails_json` must be
/// null or a valid NUL-terminated UTF-8 C string holding a JSON array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mailcore_create_contact(
    contact_json: *const c_char,
    emails_json: *const c_char,
) -> i64 {
    let Some(contact_raw) = (unsafe { read_str(contact_json) }) else {
        return -1;
    };
    let contact: NewContact = match serde_json::from_str(contact_raw) {
        Ok(contact) => contact,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed contact json");
            return -1;
        }
    };
    let Some(emails) = (unsafe { read_emails(emails_json) }) else {
        return -1;
    };

    let guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return -1,
    };
    let Some(state) = guard.as_ref() else {
        return -1;
    };

    let record = match state.store.insert_contact_with_emails(&contact, &emails) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, "failed to store contact");
            return -1;
        }
    };

    match enqueue_create_contact(&state.queue, &record, &emails) {
        Ok(handle) => job_id_to_i64(handle.id()),
        Err(e) => {
            tracing::error!(error = %e, "failed to enqueue create contact job");
            -1
        }
    }
}

/// Enqueue the create contact job for a contact that is already stored. A
/// `contact_db_id` of -1 is accepted and yields a job that fails.
/// Returns the job id, or -1 when the job could not be enqueued.
///
/// # Safety
///
/// `emails_json` must be null or a valid NUL-terminated UTF-8 C string holding a
/// JSON array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mailcore_enqueue_create_contact(
    contact_db_id: i64,
    emails_json: *const c_char,
) -> i64 {
    let Some(emails) = (unsafe { read_emails(emails_json) }) else {
        return -1;
    };

    let guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return -1,
    };
    let Some(state) = guard.as_ref() else {
        return -1;
    };

    let submitted = create_contact_input(ContactDbId(contact_db_id), &emails)
        .and_then(|input| state.queue.submit(JobRequest::new(JobKind::CreateContact, input)));
    match submitted {
        Ok(handle) => job_id_to_i64(handle.id()),
        Err(e) => {
            tracing::error!(contact_db_id, error = %e, "failed to enqueue create contact job");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn mailcore_job_status(job_id: u64) -> *mut c_char {
    let guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return std::ptr::null_mut(),
    };
    let Some(state) = guard.as_ref() else {
        return std::ptr::null_mut();
    };

    let view = match state.queue.snapshot(JobId(job_id)) {
        Ok(snapshot) => JobStatusView {
            id: snapshot.id.0,
            kind: snapshot.kind,
            status: snapshot.status,
            attempts: snapshot.attempts,
        },
        Err(_) => match state.store.find_job(JobId(job_id)) {
            Ok(Some(record)) => JobStatusView {
                id: record.id.0,
                kind: record.kind,
                status: record.status,
                attempts: record.attempts,
            },
            Ok(None) => return std::ptr::null_mut(),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to load job record");
                return std::ptr::null_mut();
            }
        },
    };

    to_c_json(&view)
}

#[unsafe(no_mangle)]
pub extern "C" fn mailcore_cancel_job(job_id: u64) -> bool {
    let guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return false,
    };
    let Some(state) = guard.as_ref() else {
        return false;
    };

    match state.queue.cancel(JobId(job_id)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(job_id, error = %e, "failed to cancel job");
            false
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn mailcore_list_jobs(limit: u32) -> *mut c_char {
    let guard = match STATE.lock() {
        Ok(guard) => guard,
        Err(_) => return std::ptr::null_mut(),
    };
    let Some(state) = guard.as_ref() else {
        return std::ptr::null_mut();
    };

    match state.store.list_recent_jobs(limit as usize) {
        Ok(jobs) => to_c_json(&jobs),
        Err(e) => {
            tracing::warn!(error = %e, "failed to list jobs");
            std::ptr::null_mut()
        }
    }
}

/// Decode an API address key list into a validated key set. `primary_id` may be
/// null when the address has no primary key.
///
/// # Safety
///
/// `keys_json` must be a valid NUL-terminated UTF-8 C string. `primary_id` must be
/// null or a valid NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mailcore_decode_address_keys(
    keys_json: *const c_char,
    primary_id: *const c_char,
) -> *mut c_char {
    let Some(raw) = (unsafe { read_str(keys_json) }) else {
        return std::ptr::null_mut();
    };
    let primary_id = unsafe { read_str(primary_id) }.map(AddressKeyId::new);

    let responses: Vec<AddressKeyResponse> = match serde_json::from_str(raw) {
        Ok(responses) => responses,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed address key json");
            return std::ptr::null_mut();
        }
    };
    let keys: Vec<AddressKey> = responses.into_iter().map(AddressKey::from).collect();

    let decoded = match &primary_id {
        Some(id) => AddressKeys::from_keys_with_primary_id(keys, id),
        None => AddressKeys::new(None, keys),
    };
    let key_set = match decoded {
        Ok(key_set) => key_set,
        Err(e) => {
            tracing::warn!(error = %e, "rejected address key set");
            return std::ptr::null_mut();
        }
    };

    to_c_json(&AddressKeysView {
        primary_key_id: key_set.primary_key().map(|key| &key.id),
        has_keys: key_set.has_keys(),
        keys: key_set.keys(),
    })
}

/// Free a string previously returned by a `mailcore_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `mailcore_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mailcore_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated C string valid for `'a`.
unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    unsafe { read_optional_str(ptr) }.ok().flatten()
}

/// Null reads as `Ok(None)`; non-null text that is not UTF-8 is an error.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated C string valid for `'a`.
unsafe fn read_optional_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, Utf8Error> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().map(Some)
}

/// Decodes a contact email array. Null means no emails; anything unreadable is
/// rejected rather than dropped.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated C string.
unsafe fn read_emails(ptr: *const c_char) -> Option<Vec<ContactEmail>> {
    let raw = match unsafe { read_optional_str(ptr) } {
        Ok(Some(raw)) => raw,
        Ok(None) => return Some(Vec::new()),
        Err(e) => {
            tracing::warn!(error = %e, "rejected contact emails that are not valid utf-8");
            return None;
        }
    };

    match serde_json::from_str(raw) {
        Ok(emails) => Some(emails),
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed contact emails json");
            None
        }
    }
}

fn job_id_to_i64(job_id: JobId) -> i64 {
    i64::try_from(job_id.0).unwrap_or(-1)
}

fn to_c_json<T: Serialize>(value: &T) -> *mut c_char {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(_) => return std::ptr::null_mut(),
    };

    match CString::new(json) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;
    use std::ptr;
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use mailcore_core::models::{ContactDbId, ContactEmail};
    use mailcore_core::persistence::ContactStore;

    use super::{
        STATE, mailcore_create_contact, mailcore_decode_address_keys,
        mailcore_enqueue_create_contact, mailcore_free_string, mailcore_init, mailcore_job_status,
        read_emails, read_optional_str,
    };

    const NOT_UTF8_EMAILS: &[u8] = b"[{\"email\":\"a@example.com\",\"name\":\"\xff\",\"labels\":[]}]";

    fn take_json(raw: *mut c_char) -> serde_json::Value {
        assert!(!raw.is_null());
        let json = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_owned();
        unsafe { mailcore_free_string(raw) };
        serde_json::from_str(&json).unwrap()
    }

    fn wait_for_status(job_id: i64, expected: &str) {
        let job_id = u64::try_from(job_id).unwrap();
        for _ in 0..200 {
            let raw = mailcore_job_status(job_id);
            if !raw.is_null() && take_json(raw)["status"] == expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("job {job_id} never reported status {expected}");
    }

    fn stored_contact_count(ids: &[i64]) -> usize {
        let guard = STATE.lock().unwrap();
        let state = guard.as_ref().unwrap();
        ids.iter()
            .filter(|id| state.store.find_contact(ContactDbId(**id)).unwrap().is_some())
            .count()
    }

    #[test]
    fn null_emails_are_empty_but_invalid_utf8_is_rejected() {
        let invalid = CString::new(NOT_UTF8_EMAILS).unwrap();
        let valid = CString::new("[]").unwrap();

        unsafe {
            assert_eq!(read_optional_str(ptr::null()), Ok(None));
            assert!(read_optional_str(invalid.as_ptr()).is_err());
            assert_eq!(read_optional_str(valid.as_ptr()), Ok(Some("[]")));
            assert_eq!(read_emails(ptr::null()), Some(Vec::<ContactEmail>::new()));
            assert!(read_emails(invalid.as_ptr()).is_none());
        }
    }

    #[test]
    fn host_can_create_enqueue_and_observe_contact_jobs() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        let database_path = std::env::temp_dir().join(format!("mailcore-ffi-{nanos}.sqlite3"));
        let config = CString::new(
            serde_json::json!({
                "database_path": database_path,
                "scheduler": {"retry_backoff_ms": 5},
            })
            .to_string(),
        )
        .unwrap();
        assert!(unsafe { mailcore_init(config.as_ptr()) });

        let contact = CString::new(r#"{"contact_id": null, "name": "Grace Hopper"}"#).unwrap();
        let invalid_emails = CString::new(NOT_UTF8_EMAILS).unwrap();
        let emails = CString::new(
            r#"[{"email": "grace@example.com", "name": "Grace", "contact_id": null, "labels": []}]"#,
        )
        .unwrap();

        let rejected =
            unsafe { mailcore_create_contact(contact.as_ptr(), invalid_emails.as_ptr()) };
        assert_eq!(rejected, -1);
        assert_eq!(stored_contact_count(&[1, 2, 3]), 0);

        let job = unsafe { mailcore_create_contact(contact.as_ptr(), emails.as_ptr()) };
        assert!(job >= 0);
        wait_for_status(job, "succeeded");
        assert_eq!(stored_contact_count(&[1, 2, 3]), 1);

        let sentinel_job = unsafe { mailcore_enqueue_create_contact(-1, ptr::null()) };
        assert!(sentinel_job > job);
        wait_for_status(sentinel_job, "failed");

        let existing_job = unsafe { mailcore_enqueue_create_contact(1, emails.as_ptr()) };
        assert!(existing_job > sentinel_job);
        wait_for_status(existing_job, "succeeded");

        let rejected = unsafe { mailcore_enqueue_create_contact(1, invalid_emails.as_ptr()) };
        assert_eq!(rejected, -1);

        let keys = CString::new(
            r#"[{"ID": "k1", "Version": 3, "Flags": 3, "PublicKey": "pub",
                 "PrivateKey": "priv", "Active": 1}]"#,
        )
        .unwrap();
        let primary = CString::new("k1").unwrap();
        let decoded =
            take_json(unsafe { mailcore_decode_address_keys(keys.as_ptr(), primary.as_ptr()) });
        assert_eq!(decoded["primary_key_id"], "k1");
        assert_eq!(decoded["has_keys"], true);

        let unknown = CString::new("missing").unwrap();
        assert!(unsafe { mailcore_decode_address_keys(keys.as_ptr(), unknown.as_ptr()) }.is_null());
    }
}
