//! Age-based pruning of old artifacts.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime, TimeDelta};
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::naming::{matches_pattern, parse_artifact_timestamp};

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    /// Matched the glob but carried no parseable timestamp.
    pub skipped: usize,
    pub failed: usize,
}

pub fn cleanup_old_backups(cfg: &BackupConfig) -> SweepReport {
    cleanup_old_backups_at(cfg, Local::now().naive_local())
}

/// Delete this database's artifacts stamped before `now - retention_days`.
///
/// Never fails: unreadable directories, foreign files and failed deletions
/// are logged and skipped.
pub fn cleanup_old_backups_at(cfg: &BackupConfig, now: NaiveDateTime) -> SweepReport {
    let mut report = SweepReport::default();

    if !cfg.retention_enabled() {
        info!("no backup retention configured (RETENTION_DAYS <= 0), skipping cleanup");
        return report;
    }

    let Some(cutoff) = cutoff(now, cfg.retention_days) else {
        info!(
            "retention of {} days reaches past the calendar, nothing to clean up",
            cfg.retention_days
        );
        return report;
    };
    info!(
        "removing backups older than {} days (before {})",
        cfg.retention_days, cutoff
    );

    let entries = match fs::read_dir(&cfg.backup_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("could not list {}: {}", cfg.backup_dir.display(), e);
            return report;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !matches_pattern(&cfg.db_name, name) {
            continue;
        }
        if entry.file_type().map_or(true, |t| t.is_dir()) {
            continue;
        }
        let Some(created) = parse_artifact_timestamp(&cfg.db_name, name) else {
            debug!("skipping {}: no backup timestamp in name", name);
            report.skipped += 1;
            continue;
        };
        if created >= cutoff {
            continue;
        }

        remove_artifact(entry.path(), &mut report);
    }

    report
}

/// A file that is already gone counts as deleted.
fn remove_artifact(path: PathBuf, report: &mut SweepReport) {
    info!("removing old backup: {}", path.display());
    match fs::remove_file(&path) {
        Ok(()) => report.deleted.push(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => report.deleted.push(path),
        Err(e) => {
            warn!("could not remove {}: {}", path.display(), e);
            report.failed += 1;
        }
    }
}

fn cutoff(now: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    TimeDelta::try_days(days).and_then(|age| now.checked_sub_signed(age))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use std::path::Path;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn config(dir: &Path, retention_days: i64) -> BackupConfig {
        BackupConfig {
            db_host: "localhost".into(),
            db_port: 3306,
            db_user: "backup".into(),
            db_pass: "secret".into(),
            db_name: "mydb".into(),
            backup_dir: dir.to_path_buf(),
            retention_days,
            dump_bin: PathBuf::from("mysqldump"),
        }
    }

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    fn listing(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect()
    }

    const OLD: &str = "mydb_2023-01-01_00-00-00.sql.gz";
    const NEW: &str = "mydb_2099-01-01_00-00-00.sql.gz";

    #[test]
    fn deletes_only_old_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &[OLD, NEW]);

        let report = cleanup_old_backups_at(&config(dir.path(), 7), now());

        assert_eq!(report.deleted, vec![dir.path().join(OLD)]);
        assert_eq!(listing(dir.path()), BTreeSet::from([NEW.to_string()]));
    }

    #[test]
    fn disabled_retention_deletes_nothing() {
        for days in [0, -3] {
            let dir = tempfile::tempdir().unwrap();
            touch(dir.path(), &[OLD, NEW]);

            let report = cleanup_old_backups_at(&config(dir.path(), days), now());

            assert_eq!(report, SweepReport::default());
            assert_eq!(listing(dir.path()).len(), 2);
        }
    }

    #[test]
    fn cutoff_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        // exactly 7 days before now stays, one second earlier goes
        let edge = "mydb_2024-05-25_12-00-00.sql.gz";
        let past = "mydb_2024-05-25_11-59-59.sql.gz";
        touch(dir.path(), &[edge, past]);

        cleanup_old_backups_at(&config(dir.path(), 7), now());

        assert_eq!(listing(dir.path()), BTreeSet::from([edge.to_string()]));
    }

    #[test]
    fn foreign_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let others = [
            "mydb_not-a-timestamp.sql.gz",
            "otherdb_2023-01-01_00-00-00.sql.gz",
            "mydb_2023-01-01_00-00-00.sql",
            "notes.txt",
        ];
        touch(dir.path(), &others);
        fs::create_dir(dir.path().join("mydb_2023-01-02_00-00-00.sql.gz")).unwrap();

        let report = cleanup_old_backups_at(&config(dir.path(), 7), now());

        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(listing(dir.path()).len(), others.len() + 1);
    }

    #[test]
    fn second_sweep_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &[OLD, "mydb_2023-06-01_08-30-00.sql.gz", NEW]);
        let cfg = config(dir.path(), 7);

        let first = cleanup_old_backups_at(&cfg, now());
        let after_first = listing(dir.path());
        let second = cleanup_old_backups_at(&cfg, now());

        assert_eq!(first.deleted.len(), 2);
        assert!(second.deleted.is_empty());
        assert_eq!(listing(dir.path()), after_first);
    }

    #[test]
    fn vanished_file_counts_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join(OLD);
        let mut report = SweepReport::default();

        remove_artifact(gone.clone(), &mut report);

        assert_eq!(report.deleted, vec![gone]);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn failed_removal_does_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["plain-file", OLD]);
        // a path below a regular file fails with ENOTDIR, not NotFound
        let blocked = dir.path().join("plain-file").join(OLD);
        let mut report = SweepReport::default();

        remove_artifact(blocked, &mut report);
        remove_artifact(dir.path().join(OLD), &mut report);

        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, vec![dir.path().join(OLD)]);
        assert_eq!(listing(dir.path()), BTreeSet::from(["plain-file".to_string()]));
    }

    #[test]
    fn missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("gone"), 7);
        assert_eq!(cleanup_old_backups_at(&cfg, now()), SweepReport::default());
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &[OLD]);
        cleanup_old_backups_at(&config(dir.path(), i64::MAX), now());
        assert_eq!(listing(dir.path()).len(), 1);
    }
}
