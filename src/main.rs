use anyhow::Context;
use clap::Parser;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mysql_backup::config::BackupArgs;
use mysql_backup::error::BackupError;
use mysql_backup::{dump, retention};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mysql_backup=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = BackupArgs::parse();
    let config = args.load().context("invalid backup configuration")?;

    match dump::backup_database(&config).await {
        Ok(_) => {}
        // already reported; leave with the dump utility's own code
        Err(err @ BackupError::DumpFailed { .. }) => std::process::exit(err.exit_code()),
        Err(err) => return Err(err).context("backup failed"),
    }

    retention::cleanup_old_backups(&config);

    Ok(())
}
