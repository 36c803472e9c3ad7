#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_contact_schema",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS contacts (
    db_id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id TEXT UNIQUE,
    name TEXT NOT NULL,
    created_at_unix INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contact_emails (
    contact_db_id INTEGER NOT NULL REFERENCES contacts (db_id) ON DELETE CASCADE,
    email TEXT NOT NULL CHECK (length(email) > 0),
    name TEXT NOT NULL,
    contact_id TEXT,
    labels_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (contact_db_id, email)
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS contact_emails;
DROP TABLE IF EXISTS contacts;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_job_records",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS job_records (
    job_id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    input_json TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at_unix INTEGER NOT NULL,
    finished_at_unix INTEGER
);

CREATE INDEX IF NOT EXISTS idx_job_records_status
    ON job_records (status);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_job_records_status;
DROP TABLE IF EXISTS job_records;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
