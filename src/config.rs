use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_BACKUP_DIR: &str = "backups";
pub const DEFAULT_DUMP_BIN: &str = "mysqldump";

/// Command line flags. Every flag can also come from the environment
/// (or a `.env` file), e.g. `--db-user` / `DB_USER`.
#[derive(clap::Parser, Clone, Debug, Default)]
#[clap(version, about)]
pub struct BackupArgs {
    /// TOML file holding any of the settings below, keyed like the flags
    /// with underscores (`db_user = "..."`)
    #[clap(long, env)]
    pub backup_config: Option<PathBuf>,
    #[clap(long, env)]
    pub db_host: Option<String>,
    #[clap(long, env)]
    pub db_port: Option<u16>,
    #[clap(long, env)]
    pub db_user: Option<String>,
    #[clap(long, env, hide_env_values = true)]
    pub db_pass: Option<String>,
    #[clap(long, env)]
    pub db_name: Option<String>,
    #[clap(long, env)]
    pub backup_dir: Option<PathBuf>,
    /// Days to keep backups; 0 or less keeps everything
    #[clap(long, env, allow_negative_numbers = true)]
    pub retention_days: Option<i64>,
    #[clap(long, env)]
    pub dump_bin: Option<PathBuf>,
}

impl BackupArgs {
    /// Merge flags, environment and the optional config file, then validate.
    /// Flags and environment take precedence over the file.
    pub fn load(self) -> Result<BackupConfig, ConfigError> {
        let file = match &self.backup_config {
            Some(path) => Settings::from_path(path)?,
            None => Settings::default(),
        };
        self.into_settings().or(file).validate()
    }

    fn into_settings(self) -> Settings {
        Settings {
            db_host: self.db_host,
            db_port: self.db_port,
            db_user: self.db_user,
            db_pass: self.db_pass,
            db_name: self.db_name,
            backup_dir: self.backup_dir,
            retention_days: self.retention_days,
            dump_bin: self.dump_bin,
        }
    }
}

/// Unvalidated settings, as found in one source.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_user: Option<String>,
    pub db_pass: Option<String>,
    pub db_name: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<i64>,
    pub dump_bin: Option<PathBuf>,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Settings, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill the gaps in `self` from `fallback`.
    pub fn or(self, fallback: Settings) -> Settings {
        Settings {
            db_host: self.db_host.or(fallback.db_host),
            db_port: self.db_port.or(fallback.db_port),
            db_user: self.db_user.or(fallback.db_user),
            db_pass: self.db_pass.or(fallback.db_pass),
            db_name: self.db_name.or(fallback.db_name),
            backup_dir: self.backup_dir.or(fallback.backup_dir),
            retention_days: self.retention_days.or(fallback.retention_days),
            dump_bin: self.dump_bin.or(fallback.dump_bin),
        }
    }

    /// Apply defaults and check the required fields. All missing fields are
    /// reported together.
    pub fn validate(self) -> Result<BackupConfig, ConfigError> {
        let mut missing = Vec::new();
        let db_user = required(self.db_user, "DB_USER", &mut missing);
        let db_pass = required(self.db_pass, "DB_PASS", &mut missing);
        let db_name = required(self.db_name, "DB_NAME", &mut missing);

        match (db_user, db_pass, db_name) {
            (Some(db_user), Some(db_pass), Some(db_name)) => Ok(BackupConfig {
                db_host: self
                    .db_host
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                db_port: self.db_port.unwrap_or(DEFAULT_PORT),
                db_user,
                db_pass,
                db_name,
                backup_dir: self
                    .backup_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
                retention_days: self.retention_days.unwrap_or(0),
                dump_bin: self
                    .dump_bin
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_BIN)),
            }),
            _ => Err(ConfigError::Missing(missing)),
        }
    }
}

fn required(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    let value = value.filter(|v| !v.is_empty());
    if value.is_none() {
        missing.push(name);
    }
    value
}

/// Validated configuration, fixed for the whole run.
#[derive(Clone)]
pub struct BackupConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    pub backup_dir: PathBuf,
    pub retention_days: i64,
    pub dump_bin: PathBuf,
}

impl BackupConfig {
    pub fn retention_enabled(&self) -> bool {
        self.retention_days > 0
    }
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupConfig")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_pass", &"***")
            .field("db_name", &self.db_name)
            .field("backup_dir", &self.backup_dir)
            .field("retention_days", &self.retention_days)
            .field("dump_bin", &self.dump_bin)
            .finish()
    }
}
