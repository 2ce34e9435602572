use serde_json::Value as Json;
use uuid::Uuid;

use super::{AuditEvent, Vault};
use crate::crypto::{SubjectKey, content_digest};
use crate::error::{Error, Result};
use crate::store::{Document, Page, RecordTx, RecordUpdate, Table};

/// Columns nulled when a subject is forgotten.
const FORGET_FIELDS: [&str; 6] = ["key", "data", "md5", "loginidx", "emailidx", "phoneidx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Login,
    Email,
    Phone,
}

impl IndexKind {
    fn name(self) -> &'static str {
        match self {
            IndexKind::Login => "login",
            IndexKind::Email => "email",
            IndexKind::Phone => "phone",
        }
    }

    fn column(self) -> &'static str {
        match self {
            IndexKind::Login => "loginidx",
            IndexKind::Email => "emailidx",
            IndexKind::Phone => "phoneidx",
        }
    }
}

/// Plaintext values a subject can later be looked up by.
#[derive(Debug, Clone, Default)]
pub struct SubjectIndexes {
    pub login: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl SubjectIndexes {
    fn entries(&self) -> impl Iterator<Item = (IndexKind, &str)> {
        [
            (IndexKind::Login, &self.login),
            (IndexKind::Email, &self.email),
            (IndexKind::Phone, &self.phone),
        ]
        .into_iter()
        .filter_map(|(kind, value)| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (kind, v))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub token: String,
    pub profile: Json,
}

impl Vault {
    /// Registers a new subject with its own key and returns the subject token.
    pub fn create_subject(&self, profile: &Json, indexes: &SubjectIndexes) -> Result<String> {
        let result = self.insert_subject(profile, indexes);
        let mut event = AuditEvent::new("create subject").with_outcome(&result);
        if let Ok(token) = &result {
            event = event.with_record(token).with_identity(token);
        }
        self.audit.submit(event);
        result
    }

    fn insert_subject(&self, profile: &Json, indexes: &SubjectIndexes) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let mut doc = Document::new().with("token", &token);
        let hashes: Vec<(IndexKind, String)> = indexes
            .entries()
            .map(|(kind, value)| (kind, self.envelope.index_hash(kind.name(), value)))
            .collect();
        for (kind, hash) in &hashes {
            doc.insert(kind.column(), hash);
        }

        let key = self.envelope.generate_subject_key();
        let plaintext = serde_json::to_vec(profile)?;
        doc.insert("key", self.envelope.wrap_key(&token, &key)?);
        doc.insert("data", key.seal(&plaintext)?);
        doc.insert("md5", content_digest(&plaintext));

        // The unique indexes reject a concurrent duplicate that slips past this check.
        self.store.in_transaction(|tx| {
            for (kind, hash) in &hashes {
                if tx.get_record(&Table::Users, kind.column(), hash)?.is_some() {
                    return Err(Error::Conflict(format!("{} already registered", kind.name())));
                }
            }
            tx.create_record(&Table::Users, &doc)
        })?;
        Ok(token)
    }

    /// Returns the decrypted profile. Forgotten subjects read as absent.
    pub fn get_subject(&self, token: &str) -> Result<Option<Subject>> {
        let result = self.read_subject(token);
        self.audit.submit(
            AuditEvent::new("get subject")
                .with_record(token)
                .with_identity(token)
                .with_outcome(&result),
        );
        result
    }

    fn read_subject(&self, token: &str) -> Result<Option<Subject>> {
        let Some(record) = self.store.get_record(&Table::Users, "token", token)? else {
            return Ok(None);
        };
        let Some(data) = record.get_str("data") else {
            return Ok(None);
        };

        let key = self.key_from_record(token, &record)?;
        let profile = serde_json::from_slice(&key.open(data)?)?;
        Ok(Some(Subject {
            token: token.to_string(),
            profile,
        }))
    }

    /// Finds a subject token by one of its lookup indexes.
    pub fn lookup_subject(&self, kind: IndexKind, value: &str) -> Result<Option<String>> {
        let hash = self.envelope.index_hash(kind.name(), value);
        let filter = Document::new().with(kind.column(), hash);
        let record = self.store.lookup_record(&Table::Users, &filter)?;
        Ok(record.and_then(|r| r.get_str("token").map(str::to_string)))
    }

    /// Re-seals the profile. Returns 0 when the profile is unchanged.
    pub fn update_subject_profile(&self, token: &str, profile: &Json) -> Result<usize> {
        let result = self.reseal_profile(token, profile);
        let mut event = AuditEvent::new("update subject")
            .with_record(token)
            .with_identity(token);
        match &result {
            Ok((_, Some((before, after)))) => {
                event = event.with_snapshots(before.clone(), after.clone());
            }
            Ok(_) => {}
            Err(e) => event = event.failed(e.to_string()),
        }
        self.audit.submit(event);
        result.map(|(rows, _)| rows)
    }

    fn reseal_profile(
        &self,
        token: &str,
        profile: &Json,
    ) -> Result<(usize, Option<(String, String)>)> {
        let plaintext = serde_json::to_vec(profile)?;
        let digest = content_digest(&plaintext);

        self.store.in_transaction(|tx| {
            let record = tx
                .get_record(&Table::Users, "token", token)?
                .ok_or(Error::NotFound)?;
            if record.get_str("md5") == Some(digest.as_str()) {
                return Ok((0, None));
            }
            let key = self.key_from_record(token, &record)?;

            let before = match record.get_str("data") {
                Some(data) => key.open(data)?,
                None => Vec::new(),
            };

            let rows = tx.update(&RecordUpdate {
                table: Table::Users,
                filter: Document::new().with("token", token),
                set: Document::new()
                    .with("data", key.seal(&plaintext)?)
                    .with("md5", digest.as_str()),
                unset: Vec::new(),
            })?;

            Ok((rows, seal_snapshots(&key, &before, &plaintext)))
        })
    }

    /// Replaces the subject's key and re-seals everything it protects in a
    /// single transaction.
    pub fn rotate_subject_key(&self, token: &str) -> Result<()> {
        let result = self.rekey_subject(token);
        self.audit.submit(
            AuditEvent::new("rotate subject key")
                .with_record(token)
                .with_identity(token)
                .with_outcome(&result),
        );
        result
    }

    fn rekey_subject(&self, token: &str) -> Result<()> {
        self.store.in_transaction(|tx| {
            let record = tx
                .get_record(&Table::Users, "token", token)?
                .ok_or(Error::NotFound)?;
            let old_wrapped = record
                .get_str("key")
                .ok_or_else(|| Error::Decryption(format!("no key for subject {token}")))?;
            let old_key = self.envelope.unwrap_key(token, old_wrapped)?;
            let new_key = self.envelope.generate_subject_key();

            let mut user_set =
                Document::new().with("key", self.envelope.wrap_key(token, &new_key)?);
            if let Some(data) = record.get_str("data") {
                user_set.insert("data", new_key.seal(&old_key.open(data)?)?);
            }

            let mut sessions = Vec::new();
            let mut offset = 0;
            loop {
                let page = Page::new(offset, 0);
                let batch = tx.list_records_by(
                    &Table::Sessions,
                    "token",
                    token,
                    page,
                    Some("session"),
                )?;
                let done = batch.len() < page.clamped_limit() as usize;
                sessions.extend(batch);
                if done {
                    break;
                }
                offset += page.clamped_limit();
            }

            let swapped = tx.update(&RecordUpdate {
                table: Table::Users,
                filter: Document::new().with("token", token).with("key", old_wrapped),
                set: user_set,
                unset: Vec::new(),
            })?;
            if swapped != 1 {
                return Err(Error::Conflict(format!(
                    "key of subject {token} changed during rotation"
                )));
            }

            for session in &sessions {
                let (Some(id), Some(data)) = (session.get_str("session"), session.get_str("data"))
                else {
                    continue;
                };
                tx.update(&RecordUpdate {
                    table: Table::Sessions,
                    filter: Document::new().with("token", token).with("session", id),
                    set: Document::new().with("data", new_key.seal(&old_key.open(data)?)?),
                    unset: Vec::new(),
                })?;
            }
            tracing::debug!("Rotated key of subject {token}, resealed {} sessions", sessions.len());
            Ok(())
        })
    }

    /// Drops the subject's key, profile and lookup indexes, keeping the row,
    /// and deletes its sessions.
    pub fn forget_subject(&self, token: &str) -> Result<()> {
        let result = self.erase_subject(token);
        self.audit.submit(
            AuditEvent::new("forget subject")
                .with_record(token)
                .with_identity(token)
                .with_outcome(&result),
        );
        result
    }

    fn erase_subject(&self, token: &str) -> Result<()> {
        self.store.in_transaction(|tx| {
            let rows = tx.cleanup_fields(&Table::Users, "token", token, &FORGET_FIELDS)?;
            if rows == 0 {
                return Err(Error::NotFound);
            }
            let sessions = tx.delete_record(&Table::Sessions, "token", token)?;
            tracing::debug!("Forgot subject {token}, removed {sessions} sessions");
            Ok(())
        })
    }

    /// Seals `plaintext` with the subject's key.
    pub fn seal_for_subject(&self, token: &str, plaintext: &[u8]) -> Result<String> {
        self.subject_key(token)?.seal(plaintext)
    }

    /// Opens a payload sealed for the subject.
    pub fn open_for_subject(&self, token: &str, sealed: &str) -> Result<Vec<u8>> {
        self.subject_key(token)?.open(sealed)
    }

    fn subject_key(&self, token: &str) -> Result<SubjectKey> {
        self.store.in_transaction(|tx| self.subject_key_in(tx, token))
    }

    /// Resolves the subject key as seen by `tx`.
    pub(super) fn subject_key_in(&self, tx: &dyn RecordTx, token: &str) -> Result<SubjectKey> {
        let record = tx
            .get_record(&Table::Users, "token", token)?
            .ok_or_else(|| Error::Decryption(format!("no key for subject {token}")))?;
        self.key_from_record(token, &record)
    }

    fn key_from_record(&self, token: &str, record: &Document) -> Result<SubjectKey> {
        let wrapped = record
            .get_str("key")
            .ok_or_else(|| Error::Decryption(format!("no key for subject {token}")))?;
        self.envelope.unwrap_key(token, wrapped)
    }
}

/// Seals audit snapshots with the subject key; on failure they are dropped.
fn seal_snapshots(key: &SubjectKey, before: &[u8], after: &[u8]) -> Option<(String, String)> {
    match (key.seal(before), key.seal(after)) {
        (Ok(before), Ok(after)) => Some((before, after)),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("Dropping audit snapshots: {e}");
            None
        }
    }
}
