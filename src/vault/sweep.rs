use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;

use super::{AuditEvent, Vault};
use crate::error::Result;
use crate::store::Table;

/// Rows removed by one retention pass, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub audit: usize,
    pub sessions: usize,
    pub shared_records: usize,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.audit + self.sessions + self.shared_records
    }
}

impl Vault {
    /// Deletes audit events, sessions and shared records older than their
    /// retention windows, then records the pass in the audit trail.
    pub fn sweep_once(&self) -> Result<SweepReport> {
        let result = self.sweep_windows();
        let mut event = AuditEvent::new("retention sweep")
            .with_actor("vaultkeep", "system")
            .with_outcome(&result);
        if let Ok(report) = &result {
            event = event.with_msg(format!(
                "removed {} audit, {} sessions, {} shared records",
                report.audit, report.sessions, report.shared_records
            ));
        }
        self.audit.submit(event);
        result
    }

    fn sweep_windows(&self) -> Result<SweepReport> {
        let report = SweepReport {
            audit: self
                .store
                .delete_expired_window(&Table::Audit, self.policy.audit)?,
            sessions: self
                .store
                .delete_expired_window(&Table::Sessions, self.policy.session)?,
            shared_records: self
                .store
                .delete_expired_window(&Table::Sharedrecords, self.policy.shared_record)?,
        };

        tracing::info!(
            audit = report.audit,
            sessions = report.sessions,
            shared_records = report.shared_records,
            "Retention sweep complete"
        );
        Ok(report)
    }
}

/// Runs [`Vault::sweep_once`] on a fixed interval.
pub struct Sweeper {
    vault: Arc<Vault>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(vault: Arc<Vault>, interval: Duration) -> Self {
        Self { vault, interval }
    }

    /// Sweeps immediately and then on every tick until `shutdown` resolves.
    /// Returns the number of passes that succeeded.
    pub async fn run<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Sweeper stopping after {passes} passes");
                    break;
                }
                _ = ticker.tick() => {
                    let vault = Arc::clone(&self.vault);
                    match tokio::task::spawn_blocking(move || vault.sweep_once()).await {
                        Ok(Ok(_)) => passes += 1,
                        Ok(Err(e)) => tracing::warn!("Retention sweep failed: {e}"),
                        Err(e) => tracing::warn!("Retention sweep task failed: {e}"),
                    }
                }
            }
        }
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::MasterKey;
    use crate::store::{Document, Page, RecordStore, SqliteStore};
    use crate::vault::RetentionPolicy;
    use tempfile::TempDir;

    const NOW: i32 = 1_700_000_000;

    #[test]
    fn test_sweep_once_uses_each_window() {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(NOW));
        let store = SqliteStore::with_clock(temp.path().join("test.db"), clock.clone()).unwrap();
        store.initialize().unwrap();
        let policy = RetentionPolicy {
            session: 100,
            audit: 1_000,
            shared_record: 10_000,
        };
        let vault = Vault::new(Arc::new(store), MasterKey::generate(), clock, policy);

        for (table, ages) in [
            (Table::Sessions, [50, 500]),
            (Table::Audit, [500, 5_000]),
            (Table::Sharedrecords, [5_000, 50_000]),
        ] {
            for age in ages {
                vault
                    .store()
                    .create_record(
                        &table,
                        &Document::new().with("token", "u1").with("when", NOW - age),
                    )
                    .unwrap();
            }
        }

        let report = vault.sweep_once().unwrap();
        assert_eq!(
            report,
            SweepReport {
                audit: 1,
                sessions: 1,
                shared_records: 1,
            }
        );
        assert_eq!(report.total(), 3);
        assert_eq!(vault.sweep_once().unwrap().total(), 0);

        let events = vault
            .store()
            .list_records_by(&Table::Audit, "title", "retention sweep", Page::new(0, 10), None)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(
            events
                .iter()
                .any(|e| e.get_str("msg") == Some("removed 1 audit, 1 sessions, 1 shared records"))
        );
    }
}
