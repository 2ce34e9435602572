use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vaultkeep::cli::{
    AdminCommands, open_vault, run_backup, run_init, run_provision, run_sweep, run_tables,
};
use vaultkeep::vault::Sweeper;

#[derive(Parser)]
#[command(name = "vaultkeep")]
#[command(about = "A personal-data vault", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Run the retention sweeper until interrupted
    Run {
        /// Data directory for the database, master key and config
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}

async fn run(data_dir: String) -> anyhow::Result<()> {
    let (vault, config) = open_vault(&data_dir)?;
    let interval = Duration::from_secs(config.sweep_interval_secs);

    info!(
        "Vault open at {}, sweeping every {}s",
        config.data_dir.display(),
        interval.as_secs()
    );

    let sweeper = Sweeper::new(Arc::new(vault), interval);
    sweeper
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await;

    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vaultkeep=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir } => run_init(data_dir)?,
            AdminCommands::Tables { data_dir, json } => run_tables(data_dir, json)?,
            AdminCommands::Provision { data_dir, app } => run_provision(data_dir, app)?,
            AdminCommands::Sweep { data_dir, json } => run_sweep(data_dir, json)?,
            AdminCommands::Backup { data_dir, output } => run_backup(data_dir, &output)?,
        },
        Commands::Run { data_dir } => run(data_dir).await?,
    }

    Ok(())
}
