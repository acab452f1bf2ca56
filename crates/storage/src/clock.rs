//! Time sources for commit instants

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use archivum_core::Timestamp;

/// Source of wall-clock time for the backend
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Timestamp;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: AtomicU64::new(start.as_micros()),
        }
    }

    /// Move forward
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump to an instant
    pub fn set(&self, to: Timestamp) {
        self.micros.store(to.as_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
