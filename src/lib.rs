//! # Vaultkeep
//!
//! A personal-data vault: schema-free documents stored in SQLite, sealed with
//! per-subject keys under a deployment master key, expired by retention
//! policy and recorded in an audit trail.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! vaultkeep = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use vaultkeep::config::VaultConfig;
//! use vaultkeep::vault::{SubjectIndexes, Vault};
//!
//! let config = VaultConfig::load("./data")?;
//! let vault = Vault::open(&config)?;
//!
//! let subject = vault.create_subject(&serde_json::json!({}), &SubjectIndexes::default())?;
//! let session = vault.create_session(&subject, Some("24h"), br#"{"ip":"1.2.3.4"}"#)?;
//! let record = vault.get_session(&session)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod store;
pub mod vault;
