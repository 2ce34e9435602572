use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, ErrorCode, TransactionBehavior, params_from_iter};

use super::codec::{RawColumn, decode_row};
use super::query::Query;
use super::schema::SCHEMA;
use super::{Catalog, Document, Page, RecordStore, RecordTx, RecordUpdate, Table, Value};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    catalog: Catalog,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn with_clock<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        let catalog = Catalog::load(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            catalog,
            clock,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Runs `f` in a transaction that commits only if `f` succeeds.
    fn with_tx<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&SqliteTx<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(behavior)?;
        let output = f(&SqliteTx {
            conn: &tx,
            catalog: &self.catalog,
            clock: self.clock.as_ref(),
        })?;
        tx.commit()?;
        Ok(output)
    }

    fn read<T>(&self, f: impl FnOnce(&SqliteTx<'_>) -> Result<T>) -> Result<T> {
        self.with_tx(TransactionBehavior::Deferred, f)
    }

    fn write<T>(&self, f: impl FnOnce(&SqliteTx<'_>) -> Result<T>) -> Result<T> {
        self.with_tx(TransactionBehavior::Immediate, f)
    }

    fn vacuum(&self) {
        if let Err(e) = self.conn().execute_batch("VACUUM") {
            tracing::warn!("Failed to vacuum database: {e}");
        }
    }
}

/// Unique constraint violations surface as [`Error::Conflict`].
fn write_error(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(failure, msg)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(msg.clone().unwrap_or_else(|| failure.to_string()))
        }
        _ => Error::Database(e),
    }
}

fn pair(key: &str, value: &str, key2: &str, value2: &str) -> Document {
    Document::new().with(key, value).with(key2, value2)
}

/// Statement execution against an open transaction.
struct SqliteTx<'a> {
    conn: &'a Connection,
    catalog: &'a Catalog,
    clock: &'a dyn Clock,
}

impl SqliteTx<'_> {
    fn execute(&self, query: &Query) -> Result<usize> {
        tracing::debug!("execute: {}", query.sql());
        self.conn
            .execute(query.sql(), params_from_iter(query.params()))
            .map_err(write_error)
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Document>> {
        tracing::debug!("query: {}", query.sql());
        let mut stmt = self.conn.prepare(query.sql())?;
        let columns: Vec<(String, Option<String>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
            .collect();

        let mut rows = stmt.query(params_from_iter(query.params()))?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let raw = columns
                .iter()
                .enumerate()
                .map(|(i, (name, decl_type))| {
                    Ok(RawColumn {
                        name,
                        decl_type: decl_type.as_deref(),
                        value: row.get_ref(i)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            docs.push(decode_row(raw)?);
        }
        Ok(docs)
    }

    fn fetch_one(&self, query: Query) -> Result<Option<Document>> {
        let query = query.page(Page::new(0, 1));
        Ok(self.fetch(&query)?.into_iter().next())
    }

    fn count(&self, query: &Query) -> Result<i64> {
        tracing::debug!("count: {}", query.sql());
        let count = self
            .conn
            .query_row(query.sql(), params_from_iter(query.params()), |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    /// Cutoff for key expiry: a record is expired from its endtime second onwards.
    fn expiry_cutoff(&self) -> i32 {
        self.clock.now().saturating_add(1)
    }

    fn get_record2(&self, table: &Table, filter: &Document) -> Result<Option<Document>> {
        let name = self.catalog.resolve(table)?;
        self.fetch_one(Query::select(name)?.filter(filter)?)
    }

    fn list_records(
        &self,
        table: &Table,
        filter: &Document,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        let name = self.catalog.resolve(table)?;
        self.fetch(
            &Query::select(name)?
                .filter(filter)?
                .order_desc(order_by)?
                .page(page),
        )
    }

    fn count_records(&self, table: &Table, filter: &Document) -> Result<i64> {
        let name = self.catalog.resolve(table)?;
        self.count(&Query::count(name)?.filter(filter)?)
    }

    fn delete_records(&self, table: &Table, filter: &Document) -> Result<usize> {
        let name = self.catalog.resolve(table)?;
        self.execute(&Query::delete(name)?.filter(filter)?)
    }

    fn update_records(
        &self,
        table: &Table,
        filter: &Document,
        set: &Document,
        unset: &[&str],
    ) -> Result<usize> {
        let name = self.catalog.resolve(table)?;
        self.execute(&Query::update(name, set, unset)?.filter(filter)?)
    }

    fn unique_values(&self, table: &Table, column: &str) -> Result<Vec<Value>> {
        let name = self.catalog.resolve(table)?;
        let docs = self.fetch(&Query::distinct(name, column)?)?;
        Ok(docs
            .into_iter()
            .filter_map(|mut doc| doc.remove(column))
            .collect())
    }

    fn get_expiring(&self, table: &Table, key: &str, value: &str) -> Result<Vec<Document>> {
        let name = self.catalog.resolve(table)?;
        self.fetch(
            &Query::select(name)?
                .set_and_before("endtime", self.expiry_cutoff())?
                .filter_eq(key, value)?,
        )
    }

    fn delete_window(&self, table: &Table, retention_seconds: i32) -> Result<usize> {
        let name = self.catalog.resolve(table)?;
        let cutoff = self.clock.now().saturating_sub(retention_seconds);
        self.execute(&Query::delete(name)?.set_and_before("when", cutoff)?)
    }
}

impl RecordTx for SqliteTx<'_> {
    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>> {
        self.get_record2(table, &Document::new().with(key, value))
    }

    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>> {
        if filter.is_empty() {
            return Err(Error::EmptyDocument);
        }
        self.get_record2(table, filter)
    }

    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64> {
        self.count_records(table, &Document::new().with(key, value))
    }

    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.list_records(table, &Document::new().with(key, value), page, order_by)
    }

    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize> {
        let name = self.catalog.resolve(table)?;
        self.execute(&Query::insert(name, doc)?)
    }

    fn update(&self, update: &RecordUpdate) -> Result<usize> {
        if update.filter.is_empty() {
            return Err(Error::BadRequest(
                "batch update requires a filter".to_string(),
            ));
        }
        let unset: Vec<&str> = update.unset.iter().map(String::as_str).collect();
        self.update_records(&update.table, &update.filter, &update.set, &unset)
    }

    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.delete_records(table, &Document::new().with(key, value))
    }

    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        let name = self.catalog.resolve(table)?;
        self.execute(
            &Query::delete(name)?
                .set_and_before("endtime", self.expiry_cutoff())?
                .filter_eq(key, value)?,
        )
    }

    fn cleanup_fields(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        fields: &[&str],
    ) -> Result<usize> {
        self.update_records(table, &Document::new().with(key, value), &Document::new(), fields)
    }
}

impl RecordStore for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        self.catalog.reload(&conn)
    }

    fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn RecordTx) -> Result<()>) -> Result<()> {
        self.write(|tx| f(tx as &dyn RecordTx))
    }

    fn backup(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "backup target {} already exists",
                dest.display()
            )));
        }
        let target = dest
            .to_str()
            .ok_or_else(|| Error::BadRequest("backup path is not valid UTF-8".to_string()))?;

        self.conn().execute("VACUUM INTO ?1", [target])?;
        tracing::info!("Backed up database to {}", dest.display());
        Ok(())
    }

    // Catalog

    fn provision_app_table(&self, app: &str) -> Result<()> {
        let mut conn = self.conn();
        self.catalog.provision(&mut conn, app)?;
        Ok(())
    }

    fn known_tables(&self) -> Vec<String> {
        self.catalog.tables()
    }

    // Create

    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize> {
        self.write(|tx| tx.create_record(table, doc))
    }

    // Read

    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>> {
        self.read(|tx| tx.get_record(table, key, value))
    }

    fn get_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<Option<Document>> {
        self.read(|tx| tx.get_record2(table, &pair(key, value, key2, value2)))
    }

    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>> {
        self.read(|tx| tx.lookup_record(table, filter))
    }

    fn unique_values(&self, table: &Table, column: &str) -> Result<Vec<Value>> {
        self.read(|tx| tx.unique_values(table, column))
    }

    // Update

    fn update_record(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        set: &Document,
    ) -> Result<usize> {
        self.write(|tx| tx.update_records(table, &Document::new().with(key, value), set, &[]))
    }

    fn update_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
        set: &Document,
        unset: &[&str],
    ) -> Result<usize> {
        self.write(|tx| tx.update_records(table, &pair(key, value, key2, value2), set, unset))
    }

    fn apply_updates(&self, updates: &[RecordUpdate]) -> Result<usize> {
        self.write(|tx| {
            let mut total = 0;
            for update in updates {
                total += tx.update(update)?;
            }
            Ok(total)
        })
    }

    // Delete

    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.write(|tx| tx.delete_record(table, key, value))
    }

    fn delete_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<usize> {
        self.write(|tx| tx.delete_records(table, &pair(key, value, key2, value2)))
    }

    // Count and list

    fn count_records(&self, table: &Table) -> Result<i64> {
        self.read(|tx| tx.count_records(table, &Document::new()))
    }

    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64> {
        self.read(|tx| tx.count_records_by(table, key, value))
    }

    fn list_records(
        &self,
        table: &Table,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.read(|tx| tx.list_records(table, &Document::new(), page, order_by))
    }

    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.read(|tx| tx.list_records_by(table, key, value, page, order_by))
    }

    // Retention

    fn delete_expired_window(&self, table: &Table, retention_seconds: i32) -> Result<usize> {
        let rows = self.write(|tx| tx.delete_window(table, retention_seconds))?;
        self.vacuum();
        Ok(rows)
    }

    fn get_expiring(&self, table: &Table, key: &str, value: &str) -> Result<Vec<Document>> {
        self.read(|tx| tx.get_expiring(table, key, value))
    }

    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.write(|tx| tx.delete_expired(table, key, value))
    }

    fn cleanup_fields(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        fields: &[&str],
    ) -> Result<usize> {
        self.write(|tx| tx.cleanup_fields(table, key, value, fields))
    }
}
