//! Artifact file names: `{database}_{YYYY-MM-DD_HH-MM-SS}.sql.gz`.
//!
//! The name is the only record of when a backup was taken, so the retention
//! sweep parses it back out of the file name.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

pub const ARTIFACT_EXTENSION: &str = ".sql.gz";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn artifact_file_name(database: &str, timestamp: NaiveDateTime) -> String {
    format!(
        "{}_{}{}",
        database,
        timestamp.format(TIMESTAMP_FORMAT),
        ARTIFACT_EXTENSION
    )
}

pub fn artifact_path(dir: &Path, database: &str, timestamp: NaiveDateTime) -> PathBuf {
    dir.join(artifact_file_name(database, timestamp))
}

/// Same as the glob `{database}_*.sql.gz`.
pub fn matches_pattern(database: &str, file_name: &str) -> bool {
    file_name
        .strip_prefix(database)
        .and_then(|rest| rest.strip_prefix('_'))
        .map_or(false, |rest| rest.ends_with(ARTIFACT_EXTENSION))
}

/// Timestamp embedded in an artifact name, or `None` if the name is not one
/// of ours.
pub fn parse_artifact_timestamp(database: &str, file_name: &str) -> Option<NaiveDateTime> {
    let stem = file_name.strip_suffix(ARTIFACT_EXTENSION)?;
    let stamp = stem.strip_prefix(database)?.strip_prefix('_')?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}
