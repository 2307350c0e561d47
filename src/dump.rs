//! Run the dump utility and stream its output into a gzip artifact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{Local, NaiveDateTime};
use flate2::{write::GzEncoder, Compression};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::naming::artifact_path;

/// Bytes read from the dump's stdout per iteration.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Chunks allowed to wait for the compressor.
pub const SINK_QUEUE: usize = 2;

/// Arguments handed to `mysqldump`, the database name last.
pub fn dump_args(cfg: &BackupConfig) -> Vec<String> {
    vec![
        format!("-h{}", cfg.db_host),
        format!("-P{}", cfg.db_port),
        format!("-u{}", cfg.db_user),
        format!("-p{}", cfg.db_pass),
        "--routines".to_string(),
        "--events".to_string(),
        "--triggers".to_string(),
        cfg.db_name.clone(),
    ]
}

pub async fn backup_database(cfg: &BackupConfig) -> Result<PathBuf, BackupError> {
    backup_database_at(cfg, Local::now().naive_local()).await
}

/// Dump the database into `{db}_{started}.sql.gz` in the backup directory.
///
/// On any failure the partial artifact is removed before the error is
/// returned, so a failed run leaves nothing behind.
pub async fn backup_database_at(
    cfg: &BackupConfig,
    started: NaiveDateTime,
) -> Result<PathBuf, BackupError> {
    fs::create_dir_all(&cfg.backup_dir).map_err(|source| BackupError::Io {
        path: cfg.backup_dir.clone(),
        source,
    })?;

    let path = artifact_path(&cfg.backup_dir, &cfg.db_name, started);
    info!("creating MySQL backup: {}", path.display());

    let program = cfg.dump_bin.display().to_string();
    let mut child = Command::new(&cfg.dump_bin)
        .args(dump_args(cfg))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| launch_error(&program, source))?;

    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(BackupError::Spawn {
            program,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "dump output is not piped"),
        });
    };

    // stderr is collected on the side so a chatty dump can't stall on a full pipe
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            debug!("reading dump stderr: {}", e);
        }
        buf
    });

    let raw_bytes = write_artifact(stdout, &path, &program).await?;

    let stderr = stderr_task.await.unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

    let status = match child.wait().await {
        Ok(status) => status,
        Err(source) => {
            remove_partial(&path);
            return Err(BackupError::Spawn { program, source });
        }
    };

    if !status.success() {
        // killed by a signal: no code to pass on
        let code = status.code().unwrap_or(1);
        error!("backup failed, {} exited with {}", program, status);
        if !stderr.is_empty() {
            error!("{}", stderr);
        }
        remove_partial(&path);
        return Err(BackupError::DumpFailed { code, stderr });
    }

    if !stderr.is_empty() {
        debug!("dump stderr: {}", stderr);
    }
    let compressed = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    info!(
        "backup created: {} ({} bytes dumped, {} bytes compressed)",
        path.display(),
        raw_bytes,
        compressed
    );
    Ok(path)
}

/// Why a streaming copy stopped.
#[derive(Debug)]
pub enum StreamError {
    /// Reading the source failed.
    Read(io::Error),
    /// Creating, compressing into or flushing the file failed.
    Write(io::Error),
}

/// Copy `source` into a new gzip file at `path`, one chunk at a time.
/// Returns the number of uncompressed bytes written.
///
/// Compression and file writes run on a blocking thread, fed through a
/// channel of at most `SINK_QUEUE` chunks.
pub async fn stream_compressed<R>(mut source: R, path: &Path) -> Result<u64, StreamError>
where
    R: AsyncRead + Unpin,
{
    let file = File::create(path).map_err(StreamError::Write)?;
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SINK_QUEUE);

    let sink = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        while let Some(chunk) = rx.blocking_recv() {
            encoder.write_all(&chunk)?;
        }
        encoder.finish()?.flush()
    });

    let mut total = 0u64;
    let read = loop {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if n == 0 {
            break Ok(());
        }
        buf.truncate(n);
        total += n as u64;
        // a closed channel means the sink gave up; its error is picked up below
        if tx.send(buf).await.is_err() {
            break Ok(());
        }
    };
    drop(tx);

    // always wait for the sink so the file is closed before anyone removes it
    let written = sink
        .await
        .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));
    read.map_err(StreamError::Read)?;
    written.map_err(StreamError::Write)?;
    Ok(total)
}

/// Stream the dump output into the artifact, removing the artifact again
/// if the copy fails.
async fn write_artifact<R>(source: R, path: &Path, program: &str) -> Result<u64, BackupError>
where
    R: AsyncRead + Unpin,
{
    match stream_compressed(source, path).await {
        Ok(n) => Ok(n),
        Err(err) => {
            remove_partial(path);
            Err(match err {
                StreamError::Read(source) => BackupError::DumpRead {
                    program: program.to_string(),
                    source,
                },
                StreamError::Write(source) => BackupError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            })
        }
    }
}

fn launch_error(program: &str, source: io::Error) -> BackupError {
    if source.kind() == io::ErrorKind::NotFound {
        BackupError::DumpNotFound {
            program: program.to_string(),
        }
    } else {
        BackupError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed partial backup {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove partial backup {}: {}", path.display(), e),
    }
}
