//! Vault behaviour when the store misbehaves or other writers interleave:
//! failed audit appends, writes landing just before a key rotation and
//! concurrent session traffic.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;
use vaultkeep::clock::ManualClock;
use vaultkeep::crypto::MasterKey;
use vaultkeep::error::{Error, Result};
use vaultkeep::store::{
    Document, Page, RecordStore, RecordTx, RecordUpdate, SqliteStore, Table, Value,
};
use vaultkeep::vault::{RetentionPolicy, SubjectIndexes, Vault};

const START: i32 = 1_700_000_000;

type Hook = Box<dyn FnOnce(&SqliteStore) + Send>;

/// Delegates to SQLite, optionally failing audit writes or session deletes
/// and running a hook right before the next transaction begins.
struct InterposedStore {
    inner: SqliteStore,
    fail_audit: AtomicBool,
    fail_session_delete: AtomicBool,
    before_transaction: Mutex<Option<Hook>>,
}

struct InterposedTx<'a> {
    inner: &'a dyn RecordTx,
    fail_session_delete: bool,
}

impl RecordTx for InterposedTx<'_> {
    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>> {
        self.inner.get_record(table, key, value)
    }

    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>> {
        self.inner.lookup_record(table, filter)
    }

    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64> {
        self.inner.count_records_by(table, key, value)
    }

    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.inner.list_records_by(table, key, value, page, order_by)
    }

    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize> {
        self.inner.create_record(table, doc)
    }

    fn update(&self, update: &RecordUpdate) -> Result<usize> {
        self.inner.update(update)
    }

    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        if *table == Table::Sessions && self.fail_session_delete {
            return Err(Error::BadRequest("sessions table unavailable".to_string()));
        }
        self.inner.delete_record(table, key, value)
    }

    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.inner.delete_expired(table, key, value)
    }

    fn cleanup_fields(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        fields: &[&str],
    ) -> Result<usize> {
        self.inner.cleanup_fields(table, key, value, fields)
    }
}

impl InterposedStore {
    fn set_hook(&self, hook: Hook) {
        *self.before_transaction.lock().unwrap() = Some(hook);
    }
}

impl RecordStore for InterposedStore {
    fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    fn ping(&self) -> Result<()> {
        self.inner.ping()
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn RecordTx) -> Result<()>) -> Result<()> {
        let hook = self.before_transaction.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        let fail_session_delete = self.fail_session_delete.load(Ordering::SeqCst);
        self.inner.transaction(&mut |tx| {
            f(&InterposedTx {
                inner: tx,
                fail_session_delete,
            })
        })
    }

    fn backup(&self, dest: &Path) -> Result<()> {
        self.inner.backup(dest)
    }

    fn provision_app_table(&self, app: &str) -> Result<()> {
        self.inner.provision_app_table(app)
    }

    fn known_tables(&self) -> Vec<String> {
        self.inner.known_tables()
    }

    fn create_record(&self, table: &Table, doc: &Document) -> Result<usize> {
        if *table == Table::Audit && self.fail_audit.load(Ordering::SeqCst) {
            return Err(Error::BadRequest("audit table unavailable".to_string()));
        }
        self.inner.create_record(table, doc)
    }

    fn get_record(&self, table: &Table, key: &str, value: &str) -> Result<Option<Document>> {
        self.inner.get_record(table, key, value)
    }

    fn get_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<Option<Document>> {
        self.inner.get_record2(table, key, value, key2, value2)
    }

    fn lookup_record(&self, table: &Table, filter: &Document) -> Result<Option<Document>> {
        self.inner.lookup_record(table, filter)
    }

    fn unique_values(&self, table: &Table, column: &str) -> Result<Vec<Value>> {
        self.inner.unique_values(table, column)
    }

    fn update_record(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        set: &Document,
    ) -> Result<usize> {
        self.inner.update_record(table, key, value, set)
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
        self.inner
            .update_record2(table, key, value, key2, value2, set, unset)
    }

    fn apply_updates(&self, updates: &[RecordUpdate]) -> Result<usize> {
        self.inner.apply_updates(updates)
    }

    fn delete_record(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.inner.delete_record(table, key, value)
    }

    fn delete_record2(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        key2: &str,
        value2: &str,
    ) -> Result<usize> {
        self.inner.delete_record2(table, key, value, key2, value2)
    }

    fn count_records(&self, table: &Table) -> Result<i64> {
        self.inner.count_records(table)
    }

    fn count_records_by(&self, table: &Table, key: &str, value: &str) -> Result<i64> {
        self.inner.count_records_by(table, key, value)
    }

    fn list_records(
        &self,
        table: &Table,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.inner.list_records(table, page, order_by)
    }

    fn list_records_by(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        page: Page,
        order_by: Option<&str>,
    ) -> Result<Vec<Document>> {
        self.inner.list_records_by(table, key, value, page, order_by)
    }

    fn delete_expired_window(&self, table: &Table, retention_seconds: i32) -> Result<usize> {
        self.inner.delete_expired_window(table, retention_seconds)
    }

    fn get_expiring(&self, table: &Table, key: &str, value: &str) -> Result<Vec<Document>> {
        self.inner.get_expiring(table, key, value)
    }

    fn delete_expired(&self, table: &Table, key: &str, value: &str) -> Result<usize> {
        self.inner.delete_expired(table, key, value)
    }

    fn cleanup_fields(
        &self,
        table: &Table,
        key: &str,
        value: &str,
        fields: &[&str],
    ) -> Result<usize> {
        self.inner.cleanup_fields(table, key, value, fields)
    }
}

struct TestContext {
    _temp: TempDir,
    store: Arc<InterposedStore>,
    vault: Vault,
}

impl TestContext {
    fn new() -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        let clock = ManualClock::new(START);
        let inner = SqliteStore::with_clock(temp.path().join("vault.db"), Arc::new(clock.clone()))
            .expect("open store");
        inner.initialize().expect("initialize");

        let store = Arc::new(InterposedStore {
            inner,
            fail_audit: AtomicBool::new(false),
            fail_session_delete: AtomicBool::new(false),
            before_transaction: Mutex::new(None),
        });
        let vault = Vault::new(
            store.clone(),
            MasterKey::generate(),
            Arc::new(clock),
            RetentionPolicy::default(),
        );
        Self {
            _temp: temp,
            store,
            vault,
        }
    }

    fn subject(&self) -> String {
        self.vault
            .create_subject(&json!({"name": "test"}), &SubjectIndexes::default())
            .expect("create subject")
    }
}

#[test]
fn test_failed_audit_does_not_change_outcome() {
    let ctx = TestContext::new();
    let subject = ctx.subject();
    ctx.store.fail_audit.store(true, Ordering::SeqCst);

    let id = ctx.vault.create_session(&subject, None, b"payload").unwrap();
    let session = ctx.vault.get_session(&id).unwrap();
    assert_eq!(session.payload, b"payload");
    assert!(matches!(
        ctx.vault.get_session("missing"),
        Err(Error::NotFound)
    ));
    ctx.vault.rotate_subject_key(&subject).unwrap();

    assert_eq!(ctx.vault.audit().count_for_record(&id).unwrap(), 0);

    ctx.store.fail_audit.store(false, Ordering::SeqCst);
    ctx.vault.get_session(&id).unwrap();
    assert_eq!(ctx.vault.audit().count_for_record(&id).unwrap(), 1);
}

#[test]
fn test_session_committed_before_rotation_is_resealed() {
    let ctx = TestContext::new();
    let subject = ctx.subject();
    ctx.vault.create_session(&subject, None, b"early").unwrap();

    // Sealed under the key that is current when rotation starts, and
    // committed by another writer just before the rotation transaction.
    let sealed = ctx.vault.seal_for_subject(&subject, b"late").unwrap();
    let owner = subject.clone();
    ctx.store.set_hook(Box::new(move |store: &SqliteStore| {
        store
            .create_record(
                &Table::Sessions,
                &Document::new()
                    .with("token", owner.as_str())
                    .with("session", "late")
                    .with("data", sealed)
                    .with("endtime", 0)
                    .with("when", START),
            )
            .unwrap();
    }));

    ctx.vault.rotate_subject_key(&subject).unwrap();

    assert_eq!(ctx.vault.get_session("late").unwrap().payload, b"late");
    let page = ctx
        .vault
        .list_sessions_for_subject(&subject, Page::new(0, 10))
        .unwrap();
    assert_eq!(page.total, 2);
}

#[test]
fn test_rotation_interleaved_with_session_traffic() {
    let ctx = TestContext::new();
    let subject = ctx.subject();

    let created: Vec<(String, Vec<u8>)> = std::thread::scope(|scope| {
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let vault = &ctx.vault;
                let subject = subject.as_str();
                scope.spawn(move || {
                    (0..20)
                        .map(|i| {
                            let payload = format!("writer {w} session {i}").into_bytes();
                            let id = vault.create_session(subject, None, &payload).unwrap();
                            (id, payload)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for _ in 0..5 {
            ctx.vault.rotate_subject_key(&subject).unwrap();
        }

        writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    assert_eq!(created.len(), 80);
    for (id, payload) in &created {
        assert_eq!(&ctx.vault.get_session(id).unwrap().payload, payload);
    }
    assert_eq!(
        ctx.vault.get_subject(&subject).unwrap().unwrap().profile,
        json!({"name": "test"})
    );
}

#[test]
fn test_forget_is_all_or_nothing() {
    let ctx = TestContext::new();
    let subject = ctx.subject();
    let id = ctx.vault.create_session(&subject, None, b"x").unwrap();

    ctx.store.fail_session_delete.store(true, Ordering::SeqCst);
    assert!(matches!(
        ctx.vault.forget_subject(&subject),
        Err(Error::BadRequest(_))
    ));

    assert_eq!(ctx.vault.get_session(&id).unwrap().payload, b"x");
    assert!(ctx.vault.get_subject(&subject).unwrap().is_some());

    ctx.store.fail_session_delete.store(false, Ordering::SeqCst);
    ctx.vault.forget_subject(&subject).unwrap();
    assert!(matches!(ctx.vault.get_session(&id), Err(Error::NotFound)));
}
