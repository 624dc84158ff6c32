use dbferry_core::{appconfig::BackupEntry, tool::Tools, transfer};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use time::{format_description::FormatItem, OffsetDateTime};

const TICK_INTERVAL: Duration = Duration::from_secs(30);

const ARCHIVE_TIME_FORMAT: &[FormatItem<'static>] =
    time::macros::format_description!("[year][month][day]-[hour][minute][second]");

#[derive(Debug)]
struct ScheduledBackup {
    entry: BackupEntry,
    last_run: Option<OffsetDateTime>,
}

impl ScheduledBackup {
    fn is_due(&self, start_time: OffsetDateTime, now: OffsetDateTime) -> bool {
        self.last_run.unwrap_or(start_time) + self.entry.every <= now
    }
}

/// Periodically exports the configured databases into timestamped archives,
/// keeping only the newest `retention` archives per entry.
#[derive(Debug)]
pub struct Scheduler {
    tools: Tools,
    backups: Vec<ScheduledBackup>,
    start_time: OffsetDateTime,
}

impl Scheduler {
    pub fn new(tools: Tools, entries: Vec<BackupEntry>) -> Self {
        Scheduler {
            tools,
            backups: entries
                .into_iter()
                .map(|entry| ScheduledBackup {
                    entry,
                    last_run: None,
                })
                .collect(),
            start_time: OffsetDateTime::now_utc(),
        }
    }

    #[tracing::instrument(name = "scheduler", skip_all)]
    pub async fn run(&mut self) -> eyre::Result<()> {
        tracing::info!(backups = self.backups.len(), "starting backup scheduler");
        loop {
            tokio::time::sleep(TICK_INTERVAL).await;
            self.run_due_backups().await;
        }
    }

    async fn run_due_backups(&mut self) {
        let now = OffsetDateTime::now_utc();
        for scheduled in &mut self.backups {
            if !scheduled.is_due(self.start_time, now) {
                continue;
            }
            scheduled.last_run = Some(now);
            if let Err(error) = run_backup(&self.tools, &scheduled.entry, now).await {
                tracing::error!(%error, database = %scheduled.entry.database, "scheduled backup failed");
            }
        }
    }
}

async fn run_backup(
    tools: &Tools,
    entry: &BackupEntry,
    now: OffsetDateTime,
) -> eyre::Result<()> {
    tokio::fs::create_dir_all(&entry.directory).await?;
    let archive = entry.directory.join(archive_file_name(&entry.database.0, now)?);
    tracing::info!(database = %entry.database, archive = %archive.display(), "running scheduled backup");
    transfer::export_database(tools, &entry.endpoint(), &archive).await?;
    prune_archives(&entry.directory, &entry.database.0, entry.retention)?;
    Ok(())
}

fn archive_file_name(database: &str, now: OffsetDateTime) -> eyre::Result<String> {
    Ok(format!(
        "{}_{}.zip",
        database,
        now.format(ARCHIVE_TIME_FORMAT)?
    ))
}

/// Archive names embed a sortable timestamp, so lexicographic order is
/// chronological order.
fn prune_archives(directory: &Path, database: &str, retention: usize) -> std::io::Result<()> {
    let prefix = format!("{}_", database);
    let mut archives: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|name| {
                    let name = name.to_string_lossy();
                    name.starts_with(&prefix) && name.ends_with(".zip")
                })
                .unwrap_or(false)
        })
        .collect();
    archives.sort();
    archives.reverse();
    for old in archives.iter().skip(retention) {
        tracing::debug!(archive = %old.display(), "pruning old backup archive");
        std::fs::remove_file(old)?;
    }
    Ok(())
}
