use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::models::{
    ContactDbId, ContactEmail, ContactRecord, CoreError, CoreErrorKind, JobId, JobInput, JobKind,
    JobRecord, JobStatus, NewContact,
};
use crate::persistence::{ContactStore, JobStore, MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "mailcore_schema_migrations";

const JOB_COLUMNS: &str =
    "job_id, kind, status, input_json, attempts, created_at_unix, finished_at_unix";

pub struct SqliteStore {
    database_path: PathBuf,
}

impl SqliteStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    pub fn prune_finished_jobs(&self, max_age: Duration) -> PersistenceResult<usize> {
        self.with_connection("prune_finished_jobs", |connection| {
            ensure_schema_ready(connection)?;
            let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(UNIX_EPOCH);
            connection.execute(
                "
DELETE FROM job_records
WHERE status IN ('succeeded', 'failed', 'cancelled')
  AND finished_at_unix IS NOT NULL
  AND finished_at_unix < ?1
",
                params![to_unix_seconds(cutoff)?],
            )
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl MigrationStore for SqliteStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Tables may be missing even though the version row exists; all
                // DDL is IF NOT EXISTS so replaying it is safe.
                for version in 1..=target_version {
                    connection.execute_batch(defined_migration(version)?.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }

            Ok(())
        })
    }
}

impl ContactStore for SqliteStore {
    fn insert_contact(&self, contact: &NewContact) -> PersistenceResult<ContactDbId> {
        self.with_connection("insert_contact", |connection| {
            ensure_schema_ready(connection)?;
            insert_contact_row(connection, contact)
        })
    }

    fn insert_contact_emails(
        &self,
        db_id: ContactDbId,
        emails: &[ContactEmail],
    ) -> PersistenceResult<()> {
        self.with_connection("insert_contact_emails", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            insert_email_rows(&transaction, db_id, emails)?;
            transaction.commit()
        })
    }

    fn insert_contact_with_emails(
        &self,
        contact: &NewContact,
        emails: &[ContactEmail],
    ) -> PersistenceResult<ContactRecord> {
        self.with_connection("insert_contact_with_emails", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;
            let db_id = insert_contact_row(&transaction, contact)?;
            insert_email_rows(&transaction, db_id, emails)?;
            transaction.commit()?;

            Ok(ContactRecord {
                db_id,
                contact_id: contact.contact_id.clone(),
                name: contact.name.clone(),
            })
        })
    }

    fn find_contact(&self, db_id: ContactDbId) -> PersistenceResult<Option<ContactRecord>> {
        self.with_connection("find_contact", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    "SELECT db_id, contact_id, name FROM contacts WHERE db_id = ?1",
                    params![db_id.0],
                    |row| {
                        Ok(ContactRecord {
                            db_id: ContactDbId(row.get(0)?),
                            contact_id: row.get(1)?,
                            name: row.get(2)?,
                        })
                    },
                )
                .optional()
        })
    }

    fn list_contact_emails(&self, db_id: ContactDbId) -> PersistenceResult<Vec<ContactEmail>> {
        self.with_connection("list_contact_emails", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT email, name, contact_id, labels_json
FROM contact_emails
WHERE contact_db_id = ?1
ORDER BY email
",
            )?;
            let rows = statement.query_map(params![db_id.0], |row| {
                let labels_json: String = row.get(3)?;
                Ok(ContactEmail {
                    email: row.get(0)?,
                    name: row.get(1)?,
                    contact_id: row.get(2)?,
                    labels: from_json(&labels_json)?,
                })
            })?;

            rows.collect()
        })
    }
}

impl JobStore for SqliteStore {
    fn create_job(&self, job: &JobRecord) -> PersistenceResult<()> {
        self.with_connection("create_job", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                &format!(
                    "INSERT INTO job_records ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    job_id_to_i64(job.id)?,
                    job.kind.as_str(),
                    job.status.as_str(),
                    to_json(&job.input)?,
                    job.attempts,
                    to_unix_seconds(job.created_at)?,
                    job.finished_at.map(to_unix_seconds).transpose()?,
                ],
            )?;
            Ok(())
        })
    }

    fn update_job(&self, job: &JobRecord) -> PersistenceResult<()> {
        self.with_connection("update_job", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE job_records
SET kind = ?2, status = ?3, input_json = ?4, attempts = ?5, created_at_unix = ?6,
    finished_at_unix = ?7
WHERE job_id = ?1
",
                params![
                    job_id_to_i64(job.id)?,
                    job.kind.as_str(),
                    job.status.as_str(),
                    to_json(&job.input)?,
                    job.attempts,
                    to_unix_seconds(job.created_at)?,
                    job.finished_at.map(to_unix_seconds).transpose()?,
                ],
            )?;

            if updated == 0 {
                return Err(storage_error_sqlite("job id was not found for update"));
            }
            Ok(())
        })
    }

    fn find_job(&self, job_id: JobId) -> PersistenceResult<Option<JobRecord>> {
        self.with_connection("find_job", |connection| {
            ensure_schema_ready(connection)?;
            connection
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM job_records WHERE job_id = ?1"),
                    params![job_id_to_i64(job_id)?],
                    read_job_row,
                )
                .optional()
        })
    }

    fn list_recent_jobs(&self, limit: usize) -> PersistenceResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_recent_jobs", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {JOB_COLUMNS}
FROM job_records
ORDER BY created_at_unix DESC, job_id DESC
LIMIT ?1
"
            ))?;
            let rows = statement.query_map(params![to_i64(limit)?], read_job_row)?;
            rows.collect()
        })
    }

    fn list_unfinished_jobs(&self) -> PersistenceResult<Vec<JobRecord>> {
        self.with_connection("list_unfinished_jobs", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(&format!(
                "
SELECT {JOB_COLUMNS}
FROM job_records
WHERE status IN ('queued', 'running')
ORDER BY job_id ASC
"
            ))?;
            let rows = statement.query_map([], read_job_row)?;
            rows.collect()
        })
    }

    fn next_job_id(&self) -> PersistenceResult<u64> {
        self.with_connection("next_job_id", |connection| {
            ensure_schema_ready(connection)?;
            let max_id: Option<i64> =
                connection.query_row("SELECT MAX(job_id) FROM job_records", [], |row| {
                    row.get(0)
                })?;
            match max_id {
                Some(id) => Ok(i64_to_u64(id)?.saturating_add(1)),
                None => Ok(0),
            }
        })
    }
}

fn insert_contact_row(
    connection: &Connection,
    contact: &NewContact,
) -> rusqlite::Result<ContactDbId> {
    connection.execute(
        "
INSERT INTO contacts (contact_id, name, created_at_unix)
VALUES (?1, ?2, strftime('%s', 'now'))
",
        params![contact.contact_id.as_deref(), contact.name.as_str()],
    )?;
    Ok(ContactDbId(connection.last_insert_rowid()))
}

fn insert_email_rows(
    connection: &Connection,
    db_id: ContactDbId,
    emails: &[ContactEmail],
) -> rusqlite::Result<()> {
    let mut statement = connection.prepare(
        "
INSERT INTO contact_emails (contact_db_id, email, name, contact_id, labels_json)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(contact_db_id, email) DO UPDATE SET
    name = excluded.name,
    contact_id = excluded.contact_id,
    labels_json = excluded.labels_json
",
    )?;

    for email in emails {
        statement.execute(params![
            db_id.0,
            email.email.as_str(),
            email.name.as_str(),
            email.contact_id.as_deref(),
            to_json(&email.labels)?,
        ])?;
    }
    Ok(())
}

fn read_job_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let job_id_raw: i64 = row.get(0)?;
    let kind_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let input_json: String = row.get(3)?;
    let attempts: u32 = row.get(4)?;
    let created_at_unix: i64 = row.get(5)?;
    let finished_at_unix: Option<i64> = row.get(6)?;

    Ok(JobRecord {
        id: JobId(i64_to_u64(job_id_raw)?),
        kind: parse_job_kind(&kind_raw)?,
        status: parse_job_status(&status_raw)?,
        input: from_json::<JobInput>(&input_json)?,
        attempts,
        created_at: from_unix_seconds(created_at_unix)?,
        finished_at: finished_at_unix.map(from_unix_seconds).transpose()?,
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(connection)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version < current_schema_version() {
        return Err(storage_error_sqlite(
            "database schema is outdated; apply migrations before store operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        storage_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn parse_job_kind(raw: &str) -> rusqlite::Result<JobKind> {
    raw.parse::<JobKind>().map_err(|_| {
        storage_error_sqlite(&format!("unknown job kind '{raw}' in sqlite record"))
    })
}

fn parse_job_status(raw: &str) -> rusqlite::Result<JobStatus> {
    raw.parse::<JobStatus>().map_err(|_| {
        storage_error_sqlite(&format!("unknown job status '{raw}' in sqlite record"))
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value)
        .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|error| {
        storage_error_sqlite(&format!("malformed json column in sqlite record: {error}"))
    })
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn job_id_to_i64(value: JobId) -> rusqlite::Result<i64> {
    i64::try_from(value.0).map_err(|_| storage_error_sqlite("job id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative job id in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("sqlite store '{operation}' failed: {}", message.as_ref()),
    )
}
