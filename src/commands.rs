use crate::cli;
use dbferry_core::{appconfig::AppConfig, config::Endpoint, migrate::ErrorKind, tool::Tools, transfer};
use dbferry_daemon::{
    job::registry::{self, Registry},
    scheduler::Scheduler,
};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn migrate(config: &AppConfig, args: cli::migrate::Cli) -> eyre::Result<()> {
    let registry = Registry::new(registry::Config {
        tools: config.tools.clone(),
        failure_policy: config.jobs.failure_policy,
        retain: config.jobs.retain,
    });
    let source = Endpoint::new(args.from, args.from_db);
    let destination = Endpoint::new(args.to, args.to_db);
    let (id, _) = registry.create(source, destination);

    let mut printed = 0;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                registry.cancel(id)?;
            }
        }

        let snapshot = registry.get(id)?;
        for line in &snapshot.log[printed..] {
            println!("{}", line);
        }
        printed = snapshot.log.len();

        if snapshot.status.is_terminal() {
            return match snapshot.error {
                None => Ok(()),
                Some(error) if error.kind == ErrorKind::Cancelled => {
                    println!("Stopped by user.");
                    Ok(())
                }
                Some(error) => Err(eyre::eyre!("migration failed: {}", error.message)),
            };
        }
    }
}

pub async fn export(tools: &Tools, args: cli::export::Cli) -> eyre::Result<()> {
    let source = Endpoint::new(args.uri, args.db);
    transfer::export_database(tools, &source, &args.archive).await?;
    println!(
        "Exported '{}' to {}",
        source.database,
        args.archive.display()
    );
    Ok(())
}

pub async fn import(tools: &Tools, args: cli::import::Cli) -> eyre::Result<()> {
    let destination = Endpoint::new(args.uri, args.db);
    transfer::import_database(tools, &args.archive, &destination).await?;
    println!(
        "Imported {} into '{}'",
        args.archive.display(),
        destination.database
    );
    Ok(())
}

pub async fn daemon(config: &AppConfig) -> eyre::Result<()> {
    if config.backups.is_empty() {
        tracing::warn!("no backups configured, the daemon will idle");
    }
    let mut scheduler = Scheduler::new(config.tools.clone(), config.backups.clone());
    tokio::select! {
        result = scheduler.run() => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}

pub fn config(config: &AppConfig) -> eyre::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

pub fn version() -> eyre::Result<()> {
    println!("dbferry {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
