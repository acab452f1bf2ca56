//! Transaction expiry background task
//!
//! [`TransactionSweeper`] runs on its own thread and periodically calls
//! [`TransactionManager::cleanup`], which expires long-lived transactions past
//! their deadline and forgets closed ids past retention.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use archivum_concurrency::{TransactionManager, TransactionSweeper};
//!
//! let sweeper = TransactionSweeper::new(Arc::clone(&manager), Duration::from_secs(5));
//! let handle = sweeper.start();
//!
//! // ... serve requests ...
//!
//! sweeper.shutdown();
//! handle.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::manager::TransactionManager;

/// Periodic expiry task
pub struct TransactionSweeper {
    manager: Arc<TransactionManager>,
    check_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl TransactionSweeper {
    /// Sweeper over `manager`, running every `check_interval`
    pub fn new(manager: Arc<TransactionManager>, check_interval: Duration) -> Self {
        Self {
            manager,
            check_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background thread
    ///
    /// The thread runs until [`shutdown`](Self::shutdown) is called. The first
    /// sweep happens after one interval.
    pub fn start(&self) -> JoinHandle<()> {
        let manager = Arc::clone(&self.manager);
        let shutdown = Arc::clone(&self.shutdown);
        let check_interval = self.check_interval;

        thread::spawn(move || {
            debug!(target: "archivum::txn", ?check_interval, "Transaction sweeper started");
            while !shutdown.load(Ordering::Relaxed) {
                // Short slices keep shutdown responsive.
                let slice = Duration::from_millis(100).min(check_interval);
                let mut elapsed = Duration::ZERO;
                while elapsed < check_interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(slice);
                    elapsed += slice;
                }
                manager.cleanup();
            }
        })
    }

    /// Signal the thread to exit on its next check
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown was signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
