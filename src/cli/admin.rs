use std::fs;
use std::path::{Path, PathBuf};

use anyhow::bail;
use serde::Serialize;

use crate::config::VaultConfig;
use crate::crypto::MasterKey;
use crate::store::{MAX_APP_TABLES, RecordStore, SqliteStore, Table};

use super::open_vault;

#[derive(Serialize)]
struct TablesOutput {
    core: Vec<String>,
    applications: Vec<String>,
    application_limit: usize,
}

pub fn run_init(data_dir: String) -> anyhow::Result<()> {
    let data_path: PathBuf = data_dir.into();
    fs::create_dir_all(&data_path)?;

    let config = VaultConfig::load(&data_path)?;
    let key_path = config.master_key_path();
    if key_path.exists() {
        bail!(
            "Vault already initialized. Master key exists at: {}",
            key_path.display()
        );
    }
    if config.db_path().exists() {
        bail!(
            "Database exists at {} but has no master key. Restore the key instead of re-initializing.",
            config.db_path().display()
        );
    }

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;
    MasterKey::generate().write_new(&key_path)?;

    println!();
    println!("========================================");
    println!("Vault initialized.");
    println!();
    println!("  Database:   {}", config.db_path().display());
    println!("  Master key: {}", key_path.display());
    println!();
    println!("Back up the master key. Without it no");
    println!("subject data can be decrypted.");
    println!("========================================");
    println!();

    Ok(())
}

pub fn run_tables(data_dir: String, json: bool) -> anyhow::Result<()> {
    let (vault, _) = open_vault(&data_dir)?;

    let (core, applications): (Vec<String>, Vec<String>) = vault
        .store()
        .known_tables()
        .into_iter()
        .partition(|name| Table::is_core_name(name));

    let output = TablesOutput {
        core,
        applications,
        application_limit: MAX_APP_TABLES,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        println!("Vault Tables");
        println!("{}", "─".repeat(20));
        println!("Core:          {}", output.core.join(", "));
        if output.applications.is_empty() {
            println!("Applications:  (none)");
        } else {
            println!("Applications:  {}", output.applications.join(", "));
        }
        println!(
            "Capacity:      {}/{}",
            output.applications.len(),
            output.application_limit
        );
        println!();
    }

    Ok(())
}

pub fn run_provision(data_dir: String, app: String) -> anyhow::Result<()> {
    let (vault, _) = open_vault(&data_dir)?;
    vault.provision_app_table(&app)?;
    println!("Application table '{app}' is ready.");
    Ok(())
}

pub fn run_sweep(data_dir: String, json: bool) -> anyhow::Result<()> {
    let (vault, _) = open_vault(&data_dir)?;
    let report = vault.sweep_once()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Removed {} rows ({} audit, {} sessions, {} shared records).",
            report.total(),
            report.audit,
            report.sessions,
            report.shared_records
        );
    }
    Ok(())
}

pub fn run_backup(data_dir: String, output: &Path) -> anyhow::Result<()> {
    let (vault, config) = open_vault(&data_dir)?;
    vault.store().backup(output)?;

    println!("Database backed up to {}.", output.display());
    println!(
        "The master key is not included; keep a copy of {} with it.",
        config.master_key_path().display()
    );
    Ok(())
}
