use uuid::Uuid;

use super::{AuditEvent, Vault, resolve_expiration};
use crate::error::{Error, Result};
use crate::store::{Document, Page, Table};

/// A session as returned by [`Vault::get_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub created_at: i32,
    pub payload: Vec<u8>,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: String,
    pub created_at: i32,
    /// 0 means the session never expires.
    pub endtime: i32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPage {
    pub total: i64,
    pub sessions: Vec<SessionSummary>,
}

fn is_expired(endtime: i32, now: i32) -> bool {
    endtime > 0 && now >= endtime
}

fn required<'a>(record: &'a Document, column: &str) -> Result<&'a str> {
    record.get_str(column).ok_or_else(|| Error::Decode {
        column: column.to_string(),
        kind: "missing value".to_string(),
    })
}

impl Vault {
    /// Seals `payload` for `subject` and stores it as a new session.
    ///
    /// `expiration` uses the `<n>[smhdw]` grammar and is clamped to the
    /// session retention policy. Returns the new session id.
    pub fn create_session(
        &self,
        subject: &str,
        expiration: Option<&str>,
        payload: &[u8],
    ) -> Result<String> {
        let result = self.insert_session(subject, expiration, payload);
        let mut event = AuditEvent::new("create session")
            .with_identity(subject)
            .with_actor(subject, "token")
            .with_outcome(&result);
        if let Ok(id) = &result {
            event = event.with_record(id);
        }
        self.audit.submit(event);
        result
    }

    fn insert_session(
        &self,
        subject: &str,
        expiration: Option<&str>,
        payload: &[u8],
    ) -> Result<String> {
        let seconds = resolve_expiration(self.policy.session, expiration)?;
        let id = Uuid::new_v4().to_string();

        // Sealing and insert share a transaction with the key lookup, so a
        // concurrent rotation either sees this session or happens after it.
        self.store.in_transaction(|tx| {
            let key = self.subject_key_in(tx, subject)?;
            let now = self.clock.now();
            let doc = Document::new()
                .with("token", subject)
                .with("session", &id)
                .with("data", key.seal(payload)?)
                .with("endtime", now.saturating_add(seconds))
                .with("when", now);
            tx.create_record(&Table::Sessions, &doc)
        })?;
        Ok(id)
    }

    /// Fetches and opens a session. Lapsed sessions fail with
    /// [`Error::Expired`] even before they are swept.
    pub fn get_session(&self, id: &str) -> Result<SessionRecord> {
        let result = self.read_session(id);
        let mut event = AuditEvent::new("get session")
            .with_record(id)
            .with_outcome(&result);
        if let Ok(session) = &result {
            event = event.with_identity(&session.subject);
        }
        self.audit.submit(event);
        result
    }

    fn read_session(&self, id: &str) -> Result<SessionRecord> {
        self.store.in_transaction(|tx| {
            let record = tx
                .get_record(&Table::Sessions, "session", id)?
                .ok_or(Error::NotFound)?;

            let endtime = record.get_int("endtime").unwrap_or(0);
            if is_expired(endtime, self.clock.now()) {
                return Err(Error::Expired);
            }

            let subject = required(&record, "token")?;
            let payload = self
                .subject_key_in(tx, subject)?
                .open(required(&record, "data")?)?;

            Ok(SessionRecord {
                created_at: record.get_int("when").unwrap_or(0),
                payload,
                subject: subject.to_string(),
            })
        })
    }

    /// Evicts the subject's lapsed sessions, then returns one page of the
    /// rest, newest first, with the total count.
    pub fn list_sessions_for_subject(&self, subject: &str, page: Page) -> Result<SessionPage> {
        let result = self.read_sessions(subject, page);
        self.audit.submit(
            AuditEvent::new("list sessions")
                .with_record(subject)
                .with_identity(subject)
                .with_outcome(&result),
        );
        result
    }

    fn read_sessions(&self, subject: &str, page: Page) -> Result<SessionPage> {
        self.store.in_transaction(|tx| {
            let evicted = tx.delete_expired(&Table::Sessions, "token", subject)?;
            if evicted > 0 {
                tracing::debug!("Evicted {evicted} expired sessions for {subject}");
            }

            let total = tx.count_records_by(&Table::Sessions, "token", subject)?;
            if total == 0 {
                return Ok(SessionPage::default());
            }

            let records =
                tx.list_records_by(&Table::Sessions, "token", subject, page, Some("when"))?;
            let key = self.subject_key_in(tx, subject)?;

            let sessions = records
                .iter()
                .map(|record| {
                    Ok(SessionSummary {
                        session: required(record, "session")?.to_string(),
                        created_at: record.get_int("when").unwrap_or(0),
                        endtime: record.get_int("endtime").unwrap_or(0),
                        payload: key.open(required(record, "data")?)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(SessionPage { total, sessions })
        })
    }
}
