use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vault::parse_expiration;

pub const CONFIG_FILE: &str = "vaultkeep.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the database, master key and config file.
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub database_file: String,
    pub master_key_file: String,
    pub policy: PolicyConfig,
    /// Seconds between retention sweeps.
    pub sweep_interval_secs: u64,
}

/// Retention limits, written in the expiration grammar (`90d`, `1h`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_session_retention_period: String,
    pub max_audit_retention_period: String,
    pub max_shared_record_retention_period: String,
}

impl VaultConfig {
    /// Loads `<data_dir>/vaultkeep.toml` if present, otherwise defaults.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE);

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str::<VaultConfig>(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };

        config.data_dir = data_dir;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.session_retention()?;
        self.policy.audit_retention()?;
        self.policy.shared_record_retention()?;

        if self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        for (name, file) in [
            ("database_file", &self.database_file),
            ("master_key_file", &self.master_key_file),
        ] {
            if file.is_empty() || Path::new(file).components().count() != 1 {
                return Err(Error::Config(format!(
                    "{name} must be a plain file name, got '{file}'"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    #[must_use]
    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir.join(&self.master_key_file)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_file: "vaultkeep.db".to_string(),
            master_key_file: "master.key".to_string(),
            policy: PolicyConfig::default(),
            sweep_interval_secs: 300,
        }
    }
}

impl PolicyConfig {
    pub fn session_retention(&self) -> Result<i32> {
        retention("max_session_retention_period", &self.max_session_retention_period)
    }

    pub fn audit_retention(&self) -> Result<i32> {
        retention("max_audit_retention_period", &self.max_audit_retention_period)
    }

    pub fn shared_record_retention(&self) -> Result<i32> {
        retention(
            "max_shared_record_retention_period",
            &self.max_shared_record_retention_period,
        )
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_session_retention_period: "1h".to_string(),
            max_audit_retention_period: "90d".to_string(),
            max_shared_record_retention_period: "30d".to_string(),
        }
    }
}

fn retention(name: &str, value: &str) -> Result<i32> {
    match parse_expiration(value) {
        Ok(seconds) if seconds > 0 => Ok(seconds),
        Ok(_) => Err(Error::Config(format!("{name} must be positive"))),
        Err(_) => Err(Error::Config(format!("{name}: invalid period '{value}'"))),
    }
}
