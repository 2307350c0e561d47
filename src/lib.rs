//! Scheduled MySQL backups: dump with `mysqldump`, gzip on the fly, and
//! prune artifacts older than the retention window.

pub mod config;
pub mod dump;
pub mod error;
pub mod naming;
pub mod retention;
