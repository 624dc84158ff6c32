use std::path::PathBuf;

/// A migration and backup tool for document databases.
#[derive(clap::Parser)]
pub struct Cli {
    /// Sets a custom configuration file path
    #[arg(short, long, env = "DBFERRY_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Cmd,
}

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// Migrates a database between two endpoints as a tracked job
    Migrate(migrate::Cli),

    /// Exports a database into a zip archive
    Export(export::Cli),

    /// Imports a zip archive into a database
    Import(import::Cli),

    /// Runs the scheduled-backup daemon
    Daemon,

    /// Prints the active configuration
    Config,

    /// Prints version information
    Version,
}

pub mod migrate {
    #[derive(clap::Args)]
    pub struct Cli {
        /// Connection string of the source endpoint
        #[arg(long, value_name = "URI")]
        pub from: String,

        /// Logical database to migrate
        #[arg(long, value_name = "DB")]
        pub from_db: String,

        /// Connection string of the destination endpoint
        #[arg(long, value_name = "URI")]
        pub to: String,

        /// Logical database name at the destination
        #[arg(long, value_name = "DB")]
        pub to_db: String,
    }
}

pub mod export {
    use std::path::PathBuf;

    #[derive(clap::Args)]
    pub struct Cli {
        /// Connection string of the endpoint to export from
        #[arg(value_name = "URI")]
        pub uri: String,

        /// Logical database to export
        #[arg(value_name = "DB")]
        pub db: String,

        /// Path of the archive to write
        #[arg(value_name = "ARCHIVE")]
        pub archive: PathBuf,
    }
}

pub mod import {
    use std::path::PathBuf;

    #[derive(clap::Args)]
    pub struct Cli {
        /// Path of the archive to import
        #[arg(value_name = "ARCHIVE")]
        pub archive: PathBuf,

        /// Connection string of the destination endpoint
        #[arg(value_name = "URI")]
        pub uri: String,

        /// Logical database name at the destination
        #[arg(value_name = "DB")]
        pub db: String,
    }
}
