use clap::Parser as _;
use cli::{Cli, Cmd};
use dbferry_core::appconfig::AppConfig;
use std::path::PathBuf;

mod cli;
mod commands;

fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("dbferry").join("dbferry.toml"))
}

async fn load_config(args: &Cli) -> eyre::Result<AppConfig> {
    match &args.config_file {
        Some(path) => Ok(AppConfig::parse_file(path).await?),
        None => match default_config_path() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                Ok(AppConfig::parse_file(&path).await?)
            }
            _ => Ok(AppConfig::default()),
        },
    }
}

fn setup_logger() -> eyre::Result<()> {
    use tracing::Level;
    use tracing_subscriber::{
        filter::LevelFilter, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt, Registry,
    };

    Registry::default()
        .with(LevelFilter::from(Level::INFO))
        .with(layer().with_ansi(true).with_target(false).without_time())
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    setup_logger()?;

    let args = Cli::parse();
    let config = load_config(&args).await?;

    match args.subcommand {
        Cmd::Migrate(args) => commands::migrate(&config, args).await,
        Cmd::Export(args) => commands::export(&config.tools, args).await,
        Cmd::Import(args) => commands::import(&config.tools, args).await,
        Cmd::Daemon => commands::daemon(&config).await,
        Cmd::Config => commands::config(&config),
        Cmd::Version => commands::version(),
    }
}
