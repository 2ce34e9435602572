use std::collections::BTreeSet;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::Connection;

use super::query::{is_reserved_word, validate_identifier};
use super::schema::app_table_schema;
use crate::error::{Error, Result};

/// Upper bound on dynamically provisioned application tables.
pub const MAX_APP_TABLES: usize = 10;

const MAX_APP_NAME_LEN: usize = 31;

/// The closed set of vault tables, plus per-application tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Audit,
    Xtokens,
    Sessions,
    Requests,
    Legalbasis,
    Agreements,
    Sharedrecords,
    Processingactivities,
    App(String),
}

impl Table {
    pub const CORE: [Table; 9] = [
        Table::Users,
        Table::Audit,
        Table::Xtokens,
        Table::Sessions,
        Table::Requests,
        Table::Legalbasis,
        Table::Agreements,
        Table::Sharedrecords,
        Table::Processingactivities,
    ];

    /// Physical table name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Table::Users => "users",
            Table::Audit => "audit",
            Table::Xtokens => "xtokens",
            Table::Sessions => "sessions",
            Table::Requests => "requests",
            Table::Legalbasis => "legalbasis",
            Table::Agreements => "agreements",
            Table::Sharedrecords => "sharedrecords",
            Table::Processingactivities => "processingactivities",
            Table::App(name) => name,
        }
    }

    #[must_use]
    pub fn app(name: impl Into<String>) -> Self {
        Table::App(name.into())
    }

    #[must_use]
    pub fn is_core_name(name: &str) -> bool {
        Self::CORE.iter().any(|t| t.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Application table names: lowercase, `[a-z][a-z0-9_]{1,30}`, neither a core
/// table nor an SQL keyword.
pub fn validate_app_name(name: &str) -> Result<()> {
    validate_identifier(name)?;
    let valid = name.len() >= 2
        && name.len() <= MAX_APP_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with("sqlite_")
        && !Table::is_core_name(name)
        && !is_reserved_word(name);

    if !valid {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Live set of table names known to exist in the database.
///
/// Loaded from `sqlite_master` and appended to only after a provisioning
/// statement has committed.
#[derive(Debug, Default)]
pub struct Catalog {
    known: RwLock<BTreeSet<String>>,
}

impl Catalog {
    pub fn load(conn: &Connection) -> Result<Self> {
        let catalog = Self::default();
        catalog.reload(conn)?;
        Ok(catalog)
    }

    pub fn reload(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        *self.write() = names;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeSet<String>> {
        self.known.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeSet<String>> {
        self.known.write().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains(name)
    }

    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn app_tables(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|name| !Table::is_core_name(name))
            .cloned()
            .collect()
    }

    /// Returns the physical name for `table`, failing for application tables
    /// that were never provisioned.
    pub fn resolve<'a>(&self, table: &'a Table) -> Result<&'a str> {
        match table {
            Table::App(name) => {
                if self.contains(name) {
                    Ok(name)
                } else {
                    Err(Error::UnknownTable(name.clone()))
                }
            }
            core => Ok(core.name()),
        }
    }

    /// Creates the generic application table `app` if it is not known yet.
    /// Returns `true` when a table was created.
    pub fn provision(&self, conn: &mut Connection, app: &str) -> Result<bool> {
        validate_app_name(app)?;

        let mut known = self.write();
        if known.contains(app) {
            return Ok(false);
        }

        let app_count = known.iter().filter(|n| !Table::is_core_name(n)).count();
        if app_count >= MAX_APP_TABLES {
            return Err(Error::CatalogFull {
                limit: MAX_APP_TABLES,
            });
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&app_table_schema(app))?;
        tx.commit()?;

        known.insert(app.to_string());
        tracing::info!("Provisioned application table '{}'", app);
        Ok(true)
    }
}
