use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use chrono::Utc;

/// Source of the current time as UNIX seconds.
///
/// Timestamps in the vault are 32-bit, matching the `when` and `endtime` columns.
pub trait Clock: Send + Sync {
    fn now(&self) -> i32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i32 {
        i32::try_from(Utc::now().timestamp()).unwrap_or(i32::MAX)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI32>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: i32) -> Self {
        Self {
            now: Arc::new(AtomicI32::new(start)),
        }
    }

    pub fn set(&self, now: i32) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i32) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i32 {
        self.now.load(Ordering::SeqCst)
    }
}
