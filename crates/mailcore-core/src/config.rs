use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreErrorKind};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 30_000;

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Total attempts per job, including the first one.
    pub max_attempts: u32,
    /// Base delay before a retry; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Drop finished jobs from memory once their terminal record is stored.
    /// Only takes effect when the queue has a job store.
    pub evict_finished_jobs: bool,
}

impl SchedulerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            evict_finished_jobs: false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    pub database_path: PathBuf,
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when unset.
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            log_filter: None,
            scheduler: SchedulerConfig::default(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let config: CoreConfig = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid core configuration: {error}"),
            )
        })?;

        if config.database_path.as_os_str().is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "core configuration requires a non-empty database_path",
            ));
        }
        if config.scheduler.max_attempts == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "scheduler.max_attempts must be at least 1",
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CoreConfig, SchedulerConfig};
    use crate::models::CoreErrorKind;

    #[test]
    fn minimal_config_uses_scheduler_defaults() {
        let config = CoreConfig::from_json(r#"{"database_path": "/data/mail.sqlite3"}"#).unwrap();

        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(config.log_filter.is_none());
        assert_eq!(config.scheduler.retry_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn partial_scheduler_section_keeps_other_defaults() {
        let config = CoreConfig::from_json(
            r#"{"database_path": "mail.db", "log_filter": "mailcore_core=debug",
                "scheduler": {"max_attempts": 5, "evict_finished_jobs": true}}"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.scheduler.retry_backoff_ms, 30_000);
        assert!(config.scheduler.evict_finished_jobs);
        assert_eq!(config.log_filter.as_deref(), Some("mailcore_core=debug"));
    }

    #[test]
    fn zero_attempts_and_unknown_fields_are_rejected() {
        let zero = CoreConfig::from_json(
            r#"{"database_path": "mail.db", "scheduler": {"max_attempts": 0}}"#,
        )
        .unwrap_err();
        assert_eq!(zero.kind, CoreErrorKind::InvalidInput);

        let unknown =
            CoreConfig::from_json(r#"{"database_path": "mail.db", "verbose": true}"#).unwrap_err();
        assert_eq!(unknown.kind, CoreErrorKind::InvalidInput);
    }
}
