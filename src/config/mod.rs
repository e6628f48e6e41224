//! Configuration for a migration run.
//!
//! Everything here comes from the environment surface named in the
//! external-interfaces contract: source/target connection coordinates,
//! remote-vs-local transfer mode, an optional global date floor, and the
//! batch/import-mode toggles. There is no config-file cascade here; this
//! domain's configuration is a flat set of env vars, not a layered
//! project/user/DB precedence chain.

use std::env;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{MigrationError, Result};

/// Local-vs-remote selector for either side of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Local,
    Remote,
}

impl TransferMode {
    fn from_env(var: &str) -> Self {
        match env::var(var).unwrap_or_default().to_lowercase().as_str() {
            "remote" => Self::Remote,
            _ => Self::Local,
        }
    }
}

/// Connection coordinates for the Postgres target.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Connection coordinates for the Mongo source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub database: String,
}

/// Remote-server coordinates, present only when either side of the
/// transfer is configured as `remote`.
#[derive(Debug, Clone)]
pub struct RemoteServerConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Full resolved configuration for one invocation of the runner.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub transfer_source: TransferMode,
    pub transfer_destination: TransferMode,
    pub remote_server: Option<RemoteServerConfig>,
    pub global_date_threshold: Option<DateTime<Utc>>,
    pub import_by_batch: bool,
    pub direct_import: bool,
}

impl RunConfig {
    /// Build a `RunConfig` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Config` if a required variable is missing
    /// when transfer mode is `remote`. `GLOBAL_DATE_THRESHOLD` parse
    /// failures are never an error here: they are downgraded to a logged
    /// warning and treated as absent, matching the source contract.
    pub fn from_env() -> Result<Self> {
        let transfer_source = TransferMode::from_env("TRANSFER_SOURCE");
        let transfer_destination = TransferMode::from_env("TRANSFER_DESTINATION");

        let remote_server = if matches!(transfer_source, TransferMode::Remote)
            || matches!(transfer_destination, TransferMode::Remote)
        {
            Some(RemoteServerConfig {
                url: require_env("REMOTE_SERVER_URL")?,
                user: require_env("REMOTE_SERVER_USER")?,
                password: env::var("REMOTE_SERVER_PASSWORD").unwrap_or_default(),
            })
        } else {
            None
        };

        let source = SourceConfig {
            url: require_env("SOURCE_URL")?,
            database: require_env("SOURCE_DATABASE")?,
        };

        let target = TargetConfig {
            host: env::var("TARGET_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env::var("TARGET_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5432),
            database: env::var("TARGET_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
            user: env::var("TARGET_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: env::var("TARGET_PASSWORD").unwrap_or_default(),
        };

        Ok(Self {
            source,
            target,
            transfer_source,
            transfer_destination,
            remote_server,
            global_date_threshold: parse_global_date_threshold(),
            import_by_batch: parse_bool_env("IMPORT_BY_BATCH", true),
            direct_import: parse_bool_env("DIRECT_IMPORT", true),
        })
    }

    /// Sensitive substrings that must never appear unredacted in a log
    /// line: passwords and remote-tunnel credentials.
    #[must_use]
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = vec![self.target.password.clone()];
        if let Some(remote) = &self.remote_server {
            secrets.push(remote.password.clone());
        }
        secrets.retain(|s| !s.is_empty());
        secrets
    }
}

fn require_env(var: &str) -> Result<String> {
    env::var(var).map_err(|_| MigrationError::Config(format!("missing required env var {var}")))
}

fn parse_bool_env(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// Parse `GLOBAL_DATE_THRESHOLD` as an ISO-8601 date. Absent or invalid
/// values are treated identically: no global floor, with a warning logged
/// for the invalid case.
fn parse_global_date_threshold() -> Option<DateTime<Utc>> {
    let raw = env::var("GLOBAL_DATE_THRESHOLD").unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => {
            tracing::info!(threshold = %trimmed, "global date threshold loaded");
            Some(
                date.and_hms_opt(0, 0, 0)
                    .expect("midnight is always valid")
                    .and_utc(),
            )
        }
        Err(_) => {
            tracing::warn!(
                value = %trimmed,
                "invalid GLOBAL_DATE_THRESHOLD format, expected YYYY-MM-DD; ignoring"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "SOURCE_URL",
            "SOURCE_DATABASE",
            "TARGET_HOST",
            "TARGET_PORT",
            "TARGET_DATABASE",
            "TARGET_USER",
            "TARGET_PASSWORD",
            "TRANSFER_SOURCE",
            "TRANSFER_DESTINATION",
            "REMOTE_SERVER_URL",
            "REMOTE_SERVER_USER",
            "REMOTE_SERVER_PASSWORD",
            "GLOBAL_DATE_THRESHOLD",
            "IMPORT_BY_BATCH",
            "DIRECT_IMPORT",
        ] {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    fn missing_source_url_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = RunConfig::from_env().unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn defaults_apply_when_local() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            env::set_var("SOURCE_URL", "mongodb://localhost/db");
            env::set_var("SOURCE_DATABASE", "db");
        }
        let cfg = RunConfig::from_env().unwrap();
        assert_eq!(cfg.target.host, "localhost");
        assert_eq!(cfg.target.port, 5432);
        assert!(cfg.remote_server.is_none());
        assert!(cfg.import_by_batch);
        assert!(cfg.direct_import);
    }

    #[test]
    fn remote_mode_requires_remote_server_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            env::set_var("SOURCE_URL", "mongodb://localhost/db");
            env::set_var("SOURCE_DATABASE", "db");
            env::set_var("TRANSFER_DESTINATION", "remote");
        }
        let err = RunConfig::from_env().unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn invalid_global_threshold_is_ignored_not_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            env::set_var("SOURCE_URL", "mongodb://localhost/db");
            env::set_var("SOURCE_DATABASE", "db");
            env::set_var("GLOBAL_DATE_THRESHOLD", "not-a-date");
        }
        let cfg = RunConfig::from_env().unwrap();
        assert!(cfg.global_date_threshold.is_none());
    }

    #[test]
    fn valid_global_threshold_parses_to_midnight_utc() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            env::set_var("SOURCE_URL", "mongodb://localhost/db");
            env::set_var("SOURCE_DATABASE", "db");
            env::set_var("GLOBAL_DATE_THRESHOLD", "2024-01-01");
        }
        let cfg = RunConfig::from_env().unwrap();
        let threshold = cfg.global_date_threshold.unwrap();
        assert_eq!(threshold.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-01 00:00:00");
    }

    #[test]
    fn secrets_excludes_empty_passwords() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            env::set_var("SOURCE_URL", "mongodb://localhost/db");
            env::set_var("SOURCE_DATABASE", "db");
        }
        let cfg = RunConfig::from_env().unwrap();
        assert!(cfg.secrets().is_empty());
    }
}
