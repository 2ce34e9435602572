mod admin;
mod commands;

pub use admin::{run_backup, run_init, run_provision, run_sweep, run_tables};
pub use commands::AdminCommands;

use crate::config::VaultConfig;
use crate::vault::Vault;

/// Open the vault in a data directory, checking it was initialized
pub fn open_vault(data_dir: &str) -> anyhow::Result<(Vault, VaultConfig)> {
    let config = VaultConfig::load(data_dir)?;
    let db_path = config.db_path();

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'vaultkeep admin init' first.",
            db_path.display()
        );
    }

    let vault = Vault::open(&config)?;
    Ok((vault, config))
}
