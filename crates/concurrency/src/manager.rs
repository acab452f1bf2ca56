//! Transaction registry
//!
//! The manager creates transactions, resolves ids to live transactions and
//! sweeps expired ones. Closed ids are remembered for a retention period so
//! that a lookup reports "closed" rather than "not found".
//!
//! ## Lookup outcomes
//!
//! ```text
//! get(id)
//!   registered, open, before deadline  -> Ok(tx)
//!   registered, past deadline          -> expire, Err(TransactionClosed)
//!   registered, terminal               -> Err(TransactionClosed)
//!   recently closed                    -> Err(TransactionClosed)
//!   otherwise                          -> Err(TransactionNotFound)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use archivum_core::{RepositoryError, Result, Timestamp};
use archivum_storage::{Clock, StorageBackend, SystemClock, TransactionParticipant};

use crate::lock::LockTable;
use crate::transaction::{Transaction, TransactionState};

/// Default long-lived transaction lifetime
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(180);

/// Default time a closed id is remembered
pub const DEFAULT_CLOSED_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct ClosedEntry {
    state: TransactionState,
    closed_at: Timestamp,
}

/// Counters exposed for tests and diagnostics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Transactions created
    pub created: u64,
    /// Transactions expired by the registry
    pub expired: u64,
}

/// Creates, looks up and disposes transactions
pub struct TransactionManager {
    backend: Arc<dyn StorageBackend>,
    locks: Arc<LockTable>,
    participants: Vec<Arc<dyn TransactionParticipant>>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
    closed_retention: Duration,
    transactions: DashMap<String, Arc<Transaction>>,
    closed: DashMap<String, ClosedEntry>,
    created: AtomicU64,
    expired: AtomicU64,
}

impl TransactionManager {
    /// Manager over `backend`, sharing `locks` between its transactions
    pub fn new(backend: Arc<dyn StorageBackend>, locks: Arc<LockTable>) -> Self {
        Self {
            backend,
            locks,
            participants: Vec::new(),
            clock: Arc::new(SystemClock),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            closed_retention: DEFAULT_CLOSED_RETENTION,
            transactions: DashMap::new(),
            closed: DashMap::new(),
            created: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Register a participant finalized with every transaction
    pub fn with_participant(mut self, participant: Arc<dyn TransactionParticipant>) -> Self {
        self.participants.push(participant);
        self
    }

    /// Use a custom clock for deadlines
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the long-lived transaction lifetime
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set how long closed ids are remembered
    pub fn with_closed_retention(mut self, retention: Duration) -> Self {
        self.closed_retention = retention;
        self
    }

    /// Long-lived transaction lifetime
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Shared lock table
    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Clock used for deadlines
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Open a new short-lived transaction
    pub fn create(&self) -> Arc<Transaction> {
        let id = Uuid::new_v4().to_string();
        let tx = Arc::new(Transaction::new(
            id.clone(),
            self.backend.open_session(&id),
            Arc::clone(&self.locks),
            self.participants.clone(),
            Arc::clone(&self.clock),
            self.session_timeout,
        ));
        self.transactions.insert(id.clone(), Arc::clone(&tx));
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(target: "archivum::txn", tx = %id, "Created transaction");
        tx
    }

    /// Resolve an id to an open transaction
    pub fn get(&self, id: &str) -> Result<Arc<Transaction>> {
        if let Some(tx) = self.transactions.get(id).map(|entry| Arc::clone(entry.value())) {
            if tx.expire_if_past_deadline() {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
            let state = tx.state();
            if state.is_terminal() {
                self.retire(id, state);
                return Err(closed(id, state));
            }
            return Ok(tx);
        }
        if let Some(entry) = self.closed.get(id) {
            return Err(closed(id, entry.state));
        }
        Err(RepositoryError::TransactionNotFound(id.to_string()))
    }

    /// Move a terminal transaction to the closed table
    ///
    /// The closed entry is written before the registry entry is removed.
    fn retire(&self, id: &str, state: TransactionState) {
        self.closed.insert(
            id.to_string(),
            ClosedEntry {
                state,
                closed_at: self.clock.now(),
            },
        );
        self.transactions.remove(id);
    }

    /// Expire overdue transactions, retire terminal ones and forget closed
    /// ids past retention; returns how many were expired
    pub fn cleanup(&self) -> usize {
        let snapshot: Vec<Arc<Transaction>> = self
            .transactions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut expired = 0;
        for tx in snapshot {
            if tx.expire_if_past_deadline() {
                expired += 1;
            }
            let state = tx.state();
            if state.is_terminal() {
                self.retire(tx.id(), state);
            }
        }

        let cutoff = self.clock.now().saturating_sub(self.closed_retention);
        self.closed
            .retain(|_, entry| !entry.closed_at.is_before(cutoff));

        if expired > 0 {
            self.expired.fetch_add(expired as u64, Ordering::Relaxed);
            info!(target: "archivum::txn", expired, "Expired overdue transactions");
        }
        expired
    }

    /// Registered transactions (open or not yet retired)
    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    /// Counters
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            created: self.created.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.transactions.len())
            .field("closed", &self.closed.len())
            .field("session_timeout", &self.session_timeout)
            .finish()
    }
}

fn closed(id: &str, state: TransactionState) -> RepositoryError {
    RepositoryError::TransactionClosed {
        id: id.to_string(),
        state: state.name().to_string(),
    }
}
