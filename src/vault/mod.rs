//! Domain operations on top of the record store: subjects and their keys,
//! sessions, audit events and retention sweeps.

mod audit;
mod expiration;
mod sessions;
mod subjects;
mod sweep;

pub use audit::{AuditEvent, AuditTrail, STATUS_ERROR, STATUS_OK};
pub use expiration::{parse_expiration, resolve_expiration};
pub use sessions::{SessionPage, SessionRecord, SessionSummary};
pub use subjects::{IndexKind, Subject, SubjectIndexes};
pub use sweep::{SweepReport, Sweeper};

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{PolicyConfig, VaultConfig};
use crate::crypto::{Envelope, MasterKey};
use crate::error::{Error, Result};
use crate::store::{RecordStore, SqliteStore};

/// Retention limits in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub session: i32,
    pub audit: i32,
    pub shared_record: i32,
}

impl RetentionPolicy {
    pub fn from_config(policy: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            session: policy.session_retention()?,
            audit: policy.audit_retention()?,
            shared_record: policy.shared_record_retention()?,
        })
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            session: 60 * 60,
            audit: 90 * 24 * 60 * 60,
            shared_record: 30 * 24 * 60 * 60,
        }
    }
}

pub struct Vault {
    store: Arc<dyn RecordStore>,
    envelope: Envelope,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    audit: AuditTrail,
}

impl Vault {
    pub fn new(
        store: Arc<dyn RecordStore>,
        master: MasterKey,
        clock: Arc<dyn Clock>,
        policy: RetentionPolicy,
    ) -> Self {
        let audit = AuditTrail::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            envelope: Envelope::new(master),
            clock,
            policy,
            audit,
        }
    }

    /// Opens an initialized vault from its data directory.
    pub fn open(config: &VaultConfig) -> Result<Self> {
        let key_path = config.master_key_path();
        if !key_path.exists() {
            return Err(Error::Config(format!(
                "master key not found at {}",
                key_path.display()
            )));
        }
        let master = MasterKey::load(&key_path)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = SqliteStore::with_clock(config.db_path(), Arc::clone(&clock))?;
        store.initialize()?;

        let policy = RetentionPolicy::from_config(&config.policy)?;
        Ok(Self::new(Arc::new(store), master, clock, policy))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    #[must_use]
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Creates the generic table for application `app` if it does not exist.
    pub fn provision_app_table(&self, app: &str) -> Result<()> {
        let result = self.store.provision_app_table(app);
        self.audit.submit(
            AuditEvent::new("provision application table")
                .with_app(app)
                .with_outcome(&result),
        );
        result
    }
}
