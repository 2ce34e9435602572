//! Append-only audit trail.
//!
//! Every observable vault operation produces one [`AuditEvent`]. Appending is
//! a separate transaction from the operation it describes, and a failed append
//! never changes the operation's own outcome.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{Document, RecordStore, Table};

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";

/// One audit row before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Human readable action name, e.g. "create session".
    pub title: String,
    /// Token of the affected record.
    pub record: Option<String>,
    /// Subject the event is about.
    pub identity: Option<String>,
    /// Actor and how they authenticated.
    pub who: Option<String>,
    pub mode: Option<String>,
    pub app: Option<String>,
    /// Sealed snapshots of the record before and after a change.
    pub before: Option<String>,
    pub after: Option<String>,
    pub status: String,
    pub msg: Option<String>,
}

impl AuditEvent {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            record: None,
            identity: None,
            who: None,
            mode: None,
            app: None,
            before: None,
            after: None,
            status: STATUS_OK.to_string(),
            msg: None,
        }
    }

    pub fn with_record(mut self, record: impl Into<String>) -> Self {
        self.record = Some(record.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_actor(mut self, who: impl Into<String>, mode: impl Into<String>) -> Self {
        self.who = Some(who.into());
        self.mode = Some(mode.into());
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    pub fn with_snapshots(mut self, before: String, after: String) -> Self {
        self.before = Some(before);
        self.after = Some(after);
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, msg: impl Into<String>) -> Self {
        self.status = STATUS_ERROR.to_string();
        self.msg = Some(msg.into());
        self
    }

    /// Records the outcome of the audited operation.
    pub fn with_outcome<T>(self, result: &Result<T>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(e.to_string()),
        }
    }

    fn into_document(self, atoken: &str, when: i32) -> Document {
        Document::new()
            .with("atoken", atoken)
            .with("title", self.title)
            .with("record", self.record)
            .with("identity", self.identity)
            .with("who", self.who)
            .with("mode", self.mode)
            .with("app", self.app)
            .with("before", self.before)
            .with("after", self.after)
            .with("status", self.status)
            .with("msg", self.msg)
            .with("when", when)
    }
}

pub struct AuditTrail {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stores `event` under a fresh audit token and returns the token.
    pub fn append(&self, event: AuditEvent) -> Result<String> {
        let atoken = Uuid::new_v4().to_string();
        let doc = event.into_document(&atoken, self.clock.now());
        self.store.create_record(&Table::Audit, &doc)?;
        Ok(atoken)
    }

    /// Appends `event`, logging instead of returning a failure.
    pub fn submit(&self, event: AuditEvent) {
        let title = event.title.clone();
        if let Err(e) = self.append(event) {
            tracing::warn!("Failed to write audit event '{}': {e}", title);
        }
    }

    pub fn count_for_record(&self, record: &str) -> Result<i64> {
        self.store.count_records_by(&Table::Audit, "record", record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::store::{Page, SqliteStore};
    use tempfile::TempDir;

    fn trail(temp: &TempDir) -> (AuditTrail, Arc<SqliteStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(
            SqliteStore::with_clock(temp.path().join("test.db"), clock.clone()).unwrap(),
        );
        store.initialize().unwrap();
        (AuditTrail::new(store.clone(), clock), store)
    }

    #[test]
    fn test_builder() {
        let event = AuditEvent::new("create session")
            .with_record("s1")
            .with_identity("u1")
            .with_actor("u1", "token")
            .with_app("shop");
        assert_eq!(event.status, STATUS_OK);
        assert_eq!(event.record.as_deref(), Some("s1"));
        assert_eq!(event.mode.as_deref(), Some("token"));
        assert!(event.msg.is_none());

        let failed = AuditEvent::new("get session").with_outcome::<()>(&Err(Error::Expired));
        assert_eq!(failed.status, STATUS_ERROR);
        assert_eq!(failed.msg.as_deref(), Some("expired"));

        let ok = AuditEvent::new("get session").with_outcome(&Ok(1));
        assert_eq!(ok.status, STATUS_OK);
    }

    #[test]
    fn test_append_stores_row() {
        let temp = TempDir::new().unwrap();
        let (trail, store) = trail(&temp);

        let atoken = trail
            .append(
                AuditEvent::new("forget subject")
                    .with_record("u1")
                    .failed("boom"),
            )
            .unwrap();

        let row = store
            .get_record(&Table::Audit, "atoken", &atoken)
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("title"), Some("forget subject"));
        assert_eq!(row.get_str("status"), Some("error"));
        assert_eq!(row.get_str("msg"), Some("boom"));
        assert_eq!(row.get_int("when"), Some(1_000));
        assert!(!row.contains("before"));

        assert_eq!(trail.count_for_record("u1").unwrap(), 1);
        assert_eq!(trail.count_for_record("u2").unwrap(), 0);
    }

    #[test]
    fn test_each_append_gets_its_own_token() {
        let temp = TempDir::new().unwrap();
        let (trail, store) = trail(&temp);

        let a = trail.append(AuditEvent::new("x").with_record("r")).unwrap();
        let b = trail.append(AuditEvent::new("x").with_record("r")).unwrap();
        assert_ne!(a, b);

        let rows = store
            .list_records(&Table::Audit, Page::new(0, 10), Some("when"))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
