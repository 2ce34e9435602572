mod catalog;
pub mod codec;
mod document;
pub mod query;
mod schema;
mod sqlite;

pub use catalog::{Catalog, MAX_APP_TABLES, Table, validate_app_name};
pub use document::{Document, Value};
pub use sqlite::SqliteStore;

use std::path::Path;

use crate::error::{Error, Result};

/// Hard cap on the rows a single list call returns.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Offset/limit pagination. A limit of 0 or above [`MAX_PAGE_SIZE`] is clamped
/// to [`MAX_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    #[must_use]
    pub const fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    #[must_use]
    pub const fn clamped_limit(self) -> u32 {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            MAX_PAGE_SIZE
        } else {
            self.limit
        }
    }
}

/// One set/unset update applied as part of a batch.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub table: Table,
    pub filter: Document,
    pub set: Document,
    pub unset: Vec<String>,
}

/// Record operations available inside [`RecordStore::transaction`].
///
/// Everything done through one handle commits or rolls back together, and no
/// other writer can interleave with it.
pub trait RecordTx {
    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>>;
    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>>;
    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64>;
    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>>;
    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize>;
    fn update(&self, update: &RecordUpdate) -> Result<usize>;
    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize>;
    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize>;
    fn cleanup_fields(&self, table: &Table, key: &str, value: &str, fields: &[&str])
    -> Result<usize>;
}

/// RecordStore defines the generic document store interface.
///
/// Every method runs in its own transaction; a failure rolls back and returns
/// the engine error unchanged. Lookups return `Ok(None)` for "not found".
pub trait RecordStore: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn ping(&self) -> Result<()>;

    /// Runs `f` inside one write transaction. An error from `f` rolls back
    /// everything it did.
    fn transaction(&self, f: &mut dyn FnMut(&dyn RecordTx) -> Result<()>) -> Result<()>;

    /// Writes a consistent copy of the whole database to `dest`, which must
    /// not exist yet.
    fn backup(&self, dest: &Path) -> Result<()>;

    // Catalog
    fn provision_app_table(&self, app: &str) -> Result<()>;
    fn known_tables(&self) -> Vec<String>;

    // Create
    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize>;

    // Read
    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>>;
    fn get_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<Option<Document>>;
    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>>;
    /// Distinct non-null values of `column`, ascending.
    fn unique_values(&self, table: &Table, column: &str) -> Result<Vec<Value>>;

    // Update
    fn update_record(&self, table: &Table, key: &str, value: &str, set: &Document)
    -> Result<usize>;
    #[allow(clippy::too_many_arguments)]
    fn update_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
        set: &Document,
        unset: &[&str],
    ) -> Result<usize>;
    fn apply_updates(&self, updates: &[RecordUpdate]) -> Result<usize>;

    // Delete
    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize>;
    fn delete_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<usize>;

    // Count and list
    fn count_records(&self, table: &Table) -> Result<i64>;
    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64>;
    fn list_records(&self, table: &Table, page: Page, order_by: Option<&str>)
    -> Result<Vec<Document>>;
    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>>;

    // Retention
    fn delete_expired_window(&self, table: &Table, retention_seconds: i32) -> Result<usize>;
    /// Rows matching `key` whose `endtime` has passed. Read-only companion
    /// of [`RecordStore::delete_expired`]; both use the same cutoff.
    fn get_expiring(&self, table: &Table, key: &str, value: &str) -> Result<Vec<Document>>;
    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize>;
    fn cleanup_fields(&self, table: &Table, key: &str, value: &str, fields: &[&str])
    -> Result<usize>;
}

impl<'a> dyn RecordStore + 'a {
    /// Typed wrapper around [`RecordStore::transaction`].
    pub fn in_transaction<T>(&self, mut f: impl FnMut(&dyn RecordTx) -> Result<T>) -> Result<T> {
        let mut output = None;
        self.transaction(&mut |tx| {
            output = Some(f(tx)?);
            Ok(())
        })?;
        output.ok_or_else(|| Error::BadRequest("transaction was not run".to_string()))
    }
}
