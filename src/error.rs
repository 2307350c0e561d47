use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems found while assembling the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "missing required settings: {} (required: DB_USER, DB_PASS, DB_NAME)",
        .0.join(", ")
    )]
    Missing(Vec<&'static str>),
    #[error("could not read config file `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Fatal failures of the dump step. Each one aborts the run.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(
        "could not find `{program}`: install the MySQL client tools (mysql-client) \
         and make sure mysqldump is on PATH, or point DUMP_BIN at it"
    )]
    DumpNotFound { program: String },
    #[error("could not run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("reading output of `{program}` failed: {source}")]
    DumpRead {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("dump exited with code {code}: {stderr}")]
    DumpFailed { code: i32, stderr: String },
    #[error("i/o error on `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BackupError {
    /// Process exit code for this failure. A failed dump hands back the dump
    /// utility's own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::DumpFailed { code, .. } => *code,
            _ => 1,
        }
    }
}
