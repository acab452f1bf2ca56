//! Resource lock table
//!
//! One table is shared by every transaction. Each resource is either free,
//! held EXCLUSIVE by one transaction, or held SHARED by a set of transactions.
//!
//! | held \ requested | SHARED            | EXCLUSIVE                     |
//! |------------------|-------------------|-------------------------------|
//! | free             | grant             | grant                         |
//! | SHARED by {T}    | grant             | upgrade if only T holds it    |
//! | SHARED by others | grant             | contended                     |
//! | EXCLUSIVE by T   | already held      | already held                  |
//! | EXCLUSIVE other  | contended         | contended                     |
//!
//! On contention the table either fails immediately with
//! [`RepositoryError::Conflict`] (wait timeout of zero) or waits on a condition
//! variable until a release or the timeout.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use archivum_core::{RepositoryError, ResourceId, Result};

/// Lock strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Single holder
    Exclusive,
    /// Any number of holders; only used for adding children
    Shared,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Exclusive => f.write_str("exclusive"),
            LockMode::Shared => f.write_str("shared"),
        }
    }
}

#[derive(Debug)]
enum LockEntry {
    Exclusive(String),
    Shared(FxHashSet<String>),
}

#[derive(Debug, Default)]
struct LockState {
    entries: FxHashMap<ResourceId, LockEntry>,
    held: FxHashMap<String, Vec<ResourceId>>,
}

enum Attempt {
    Granted,
    AlreadyHeld,
    Contended,
}

impl LockState {
    fn try_acquire(&mut self, tx_id: &str, id: &ResourceId, mode: LockMode) -> Attempt {
        let attempt = match (self.entries.get_mut(id), mode) {
            (None, LockMode::Exclusive) => {
                self.entries
                    .insert(id.clone(), LockEntry::Exclusive(tx_id.to_string()));
                Attempt::Granted
            }
            (None, LockMode::Shared) => {
                let mut holders = FxHashSet::default();
                holders.insert(tx_id.to_string());
                self.entries.insert(id.clone(), LockEntry::Shared(holders));
                Attempt::Granted
            }
            (Some(LockEntry::Exclusive(holder)), _) => {
                if holder.as_str() == tx_id {
                    Attempt::AlreadyHeld
                } else {
                    Attempt::Contended
                }
            }
            (Some(LockEntry::Shared(holders)), LockMode::Shared) => {
                if holders.insert(tx_id.to_string()) {
                    Attempt::Granted
                } else {
                    Attempt::AlreadyHeld
                }
            }
            (Some(entry), LockMode::Exclusive) => {
                let sole_holder = match entry {
                    LockEntry::Shared(holders) => holders.len() == 1 && holders.contains(tx_id),
                    LockEntry::Exclusive(_) => false,
                };
                if sole_holder {
                    *entry = LockEntry::Exclusive(tx_id.to_string());
                    Attempt::AlreadyHeld
                } else {
                    Attempt::Contended
                }
            }
        };
        if matches!(attempt, Attempt::Granted) {
            self.held.entry(tx_id.to_string()).or_default().push(id.clone());
        }
        attempt
    }

    fn release_all(&mut self, tx_id: &str) -> usize {
        let Some(ids) = self.held.remove(tx_id) else {
            return 0;
        };
        for id in &ids {
            let now_free = match self.entries.get_mut(id) {
                Some(LockEntry::Exclusive(holder)) => holder.as_str() == tx_id,
                Some(LockEntry::Shared(holders)) => {
                    holders.remove(tx_id);
                    holders.is_empty()
                }
                None => false,
            };
            if now_free {
                self.entries.remove(id);
            }
        }
        ids.len()
    }
}

/// Shared table of resource locks
#[derive(Debug)]
pub struct LockTable {
    state: Mutex<LockState>,
    released: Condvar,
    wait_timeout: Duration,
}

impl LockTable {
    /// Fail-fast table
    pub fn new() -> Self {
        Self::with_wait_timeout(Duration::ZERO)
    }

    /// Table that waits up to `wait_timeout` on contention
    pub fn with_wait_timeout(wait_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            wait_timeout,
        }
    }

    /// Acquire `mode` on `id` for `tx_id`
    ///
    /// Re-acquiring a lock already held is a no-op. A SHARED lock held only by
    /// the caller is upgraded in place when EXCLUSIVE is requested.
    pub fn acquire(&self, tx_id: &str, id: &ResourceId, mode: LockMode) -> Result<()> {
        let key = id.original();
        let deadline = Instant::now() + self.wait_timeout;
        let mut state = self.state.lock();
        loop {
            match state.try_acquire(tx_id, &key, mode) {
                Attempt::Granted => {
                    debug!(target: "archivum::lock", tx = tx_id, resource = %key, %mode, "Acquired lock");
                    return Ok(());
                }
                Attempt::AlreadyHeld => return Ok(()),
                Attempt::Contended => {
                    if self.wait_timeout.is_zero()
                        || self.released.wait_until(&mut state, deadline).timed_out()
                    {
                        // A release may have raced the timeout.
                        if let Attempt::Granted | Attempt::AlreadyHeld =
                            state.try_acquire(tx_id, &key, mode)
                        {
                            return Ok(());
                        }
                        warn!(target: "archivum::lock", tx = tx_id, resource = %key, %mode, "Lock contention");
                        return Err(RepositoryError::Conflict(format!(
                            "Failed to acquire {} lock on {} for transaction {}: held by another transaction",
                            mode, key, tx_id
                        )));
                    }
                }
            }
        }
    }

    /// Release every lock held by `tx_id`; returns how many were released
    pub fn release_all(&self, tx_id: &str) -> usize {
        let released = self.state.lock().release_all(tx_id);
        if released > 0 {
            debug!(target: "archivum::lock", tx = tx_id, released, "Released locks");
            self.released.notify_all();
        }
        released
    }

    /// Resources held by `tx_id`, in acquisition order
    pub fn held_by(&self, tx_id: &str) -> Vec<ResourceId> {
        self.state
            .lock()
            .held
            .get(tx_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Mode and holders of the lock on `id`, if any
    pub fn holders(&self, id: &ResourceId) -> Option<(LockMode, Vec<String>)> {
        let state = self.state.lock();
        state.entries.get(&id.original()).map(|entry| match entry {
            LockEntry::Exclusive(holder) => (LockMode::Exclusive, vec![holder.clone()]),
            LockEntry::Shared(holders) => {
                let mut list: Vec<String> = holders.iter().cloned().collect();
                list.sort();
                (LockMode::Shared, list)
            }
        })
    }

    /// Configured wait timeout
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
