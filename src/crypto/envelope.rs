use sha2::{Digest, Sha256};

use super::{MasterKey, SubjectKey, open, seal};
use crate::error::Result;

const INDEX_DOMAIN: &[u8] = b"vaultkeep-index";

/// Master-key operations: wrapping subject keys and deriving lookup indexes.
#[derive(Debug, Clone)]
pub struct Envelope {
    master: MasterKey,
}

impl Envelope {
    #[must_use]
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    #[must_use]
    pub fn generate_subject_key(&self) -> SubjectKey {
        SubjectKey::generate()
    }

    /// Wraps `key` for storage. The subject token is bound as associated data,
    /// so a wrapped key copied onto another subject's row will not unwrap.
    pub fn wrap_key(&self, subject: &str, key: &SubjectKey) -> Result<String> {
        seal(self.master.bytes(), key.bytes(), subject.as_bytes())
    }

    pub fn unwrap_key(&self, subject: &str, wrapped: &str) -> Result<SubjectKey> {
        let bytes = open(self.master.bytes(), wrapped, subject.as_bytes())?;
        SubjectKey::from_bytes(bytes)
    }

    /// Keyed digest of a normalized lookup value (login, email, phone).
    #[must_use]
    pub fn index_hash(&self, kind: &str, value: &str) -> String {
        let normalized = value.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(INDEX_DOMAIN);
        hasher.update(self.master.bytes());
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Unkeyed SHA-256 hex digest, used to detect profile changes.
#[must_use]
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
