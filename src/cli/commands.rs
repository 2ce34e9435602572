use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the vault (create database and master key)
    Init {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },

    /// List known tables
    Tables {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create the table for an application
    Provision {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Application name (lowercase letters, digits and underscores)
        app: String,
    },

    /// Run one retention sweep and exit
    Sweep {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a consistent copy of the database to a new file
    Backup {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Destination file (must not exist)
        output: PathBuf,
    },
}
