//! Transaction: unit of work over one storage session
//!
//! ## State machine
//!
//! ```text
//!          commit ok            ┌───────────┐
//!   ┌───────────────────────────► COMMITTED │
//!   │                           └───────────┘
//! ┌─┴──┐  rollback / commit err ┌─────────────┐
//! │OPEN├────────────────────────► ROLLED_BACK │
//! └─┬──┘                        └─────────────┘
//!   │  expire / deadline passed ┌─────────┐
//!   └───────────────────────────► EXPIRED │
//!                               └─────────┘
//! ```
//!
//! Every terminal state releases the transaction's locks. Any operation on a
//! terminal transaction fails with [`RepositoryError::TransactionClosed`].
//!
//! A short-lived transaction lives for one request and has no deadline. A
//! long-lived one has an expiration instant that [`Transaction::refresh`]
//! pushes forward; once it passes, the next access expires the transaction.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use archivum_core::{RepositoryError, ResourceId, ResourceOperation, Result, Timestamp};
use archivum_storage::{Clock, PersistentStorageSession, TransactionParticipant};

use crate::lock::{LockMode, LockTable};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting operations
    Open,
    /// Applied to storage
    Committed,
    /// Discarded
    RolledBack,
    /// Terminated by deadline or by the request handler
    Expired,
}

impl TransactionState {
    /// Whether no further operations are allowed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }

    /// Lowercase name used in errors
    pub fn name(&self) -> &'static str {
        match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
struct TxInner {
    state: TransactionState,
    short_lived: bool,
    expiration: Timestamp,
    base_uri: Option<String>,
    user_agent: Option<String>,
}

/// One unit of work
///
/// Shared as `Arc<Transaction>` between the registry and request handlers;
/// all methods take `&self`.
pub struct Transaction {
    id: String,
    inner: Mutex<TxInner>,
    session: Mutex<Box<dyn PersistentStorageSession>>,
    locks: Arc<LockTable>,
    participants: Vec<Arc<dyn TransactionParticipant>>,
    clock: Arc<dyn Clock>,
    session_timeout: Duration,
}

impl Transaction {
    /// New open, short-lived transaction
    pub fn new(
        id: String,
        session: Box<dyn PersistentStorageSession>,
        locks: Arc<LockTable>,
        participants: Vec<Arc<dyn TransactionParticipant>>,
        clock: Arc<dyn Clock>,
        session_timeout: Duration,
    ) -> Self {
        let expiration = clock.now().saturating_add(session_timeout);
        Self {
            id,
            inner: Mutex::new(TxInner {
                state: TransactionState::Open,
                short_lived: true,
                expiration,
                base_uri: None,
                user_agent: None,
            }),
            session: Mutex::new(session),
            locks,
            participants,
            clock,
            session_timeout,
        }
    }

    /// Transaction id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Whether the transaction still accepts operations
    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    /// Whether the transaction was committed
    pub fn is_committed(&self) -> bool {
        self.state() == TransactionState::Committed
    }

    /// Whether this is a single-request transaction
    pub fn is_short_lived(&self) -> bool {
        self.inner.lock().short_lived
    }

    /// Promote to long-lived (`false`) or demote to short-lived (`true`)
    ///
    /// Promotion starts the expiration clock from now.
    pub fn set_short_lived(&self, short_lived: bool) {
        let mut inner = self.inner.lock();
        if inner.short_lived && !short_lived {
            inner.expiration = self.clock.now().saturating_add(self.session_timeout);
        }
        inner.short_lived = short_lived;
    }

    /// Expiration instant; `None` for short-lived transactions
    pub fn expiration(&self) -> Option<Timestamp> {
        let inner = self.inner.lock();
        if inner.short_lived {
            None
        } else {
            Some(inner.expiration)
        }
    }

    /// Whether a long-lived transaction is past its deadline
    pub fn has_expired(&self) -> bool {
        let inner = self.inner.lock();
        self.past_deadline(&inner)
    }

    /// Base URI of the request that created the transaction
    pub fn base_uri(&self) -> Option<String> {
        self.inner.lock().base_uri.clone()
    }

    /// Record the base URI
    pub fn set_base_uri(&self, base_uri: impl Into<String>) {
        self.inner.lock().base_uri = Some(base_uri.into());
    }

    /// User agent of the request that created the transaction
    pub fn user_agent(&self) -> Option<String> {
        self.inner.lock().user_agent.clone()
    }

    /// Record the user agent
    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.inner.lock().user_agent = Some(user_agent.into());
    }

    fn past_deadline(&self, inner: &TxInner) -> bool {
        !inner.short_lived
            && inner.state == TransactionState::Open
            && self.clock.now().is_after(inner.expiration)
    }

    fn closed_error(&self, state: TransactionState) -> RepositoryError {
        RepositoryError::TransactionClosed {
            id: self.id.clone(),
            state: state.name().to_string(),
        }
    }

    /// Lock the state, expiring the transaction if its deadline has passed
    fn open_guard(&self) -> Result<MutexGuard<'_, TxInner>> {
        let mut inner = self.inner.lock();
        if self.past_deadline(&inner) {
            warn!(target: "archivum::txn", tx = %self.id, "Transaction accessed after expiration");
            self.terminate(&mut inner, TransactionState::Expired);
        }
        if inner.state.is_terminal() {
            return Err(self.closed_error(inner.state));
        }
        Ok(inner)
    }

    /// Discard staged work, notify participants, release locks
    fn terminate(&self, inner: &mut TxInner, state: TransactionState) {
        if let Err(e) = self.session.lock().rollback() {
            debug!(target: "archivum::txn", tx = %self.id, error = %e, "Session already sealed");
        }
        for participant in &self.participants {
            participant.rollback(&self.id);
        }
        inner.state = state;
        self.locks.release_all(&self.id);
    }

    /// Apply all staged operations atomically
    ///
    /// Prepare, then commit the storage session, then participants. If
    /// storage rejects either step the transaction is rolled back and the
    /// error surfaces as [`RepositoryError::CommitFailed`].
    pub fn commit(&self) -> Result<Timestamp> {
        let mut inner = self.open_guard()?;
        let result = {
            let mut session = self.session.lock();
            session.prepare().and_then(|_| session.commit())
        };

        match result {
            Ok(instant) => {
                for participant in &self.participants {
                    if let Err(e) = participant.commit(&self.id, instant) {
                        // Storage already holds the changes; nothing to undo.
                        error!(
                            target: "archivum::txn",
                            tx = %self.id,
                            participant = participant.name(),
                            error = %e,
                            "Participant failed after storage commit"
                        );
                    }
                }
                inner.state = TransactionState::Committed;
                self.locks.release_all(&self.id);
                info!(target: "archivum::txn", tx = %self.id, instant = %instant, "Committed transaction");
                Ok(instant)
            }
            Err(e) => {
                error!(target: "archivum::txn", tx = %self.id, error = %e, "Commit failed, rolling back");
                self.terminate(&mut inner, TransactionState::RolledBack);
                Err(RepositoryError::CommitFailed {
                    id: self.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Commit only when short-lived; long-lived transactions wait for an
    /// explicit commit
    pub fn commit_if_short_lived(&self) -> Result<Option<Timestamp>> {
        if self.is_short_lived() {
            self.commit().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Discard all staged operations
    pub fn rollback(&self) -> Result<()> {
        let mut inner = self.open_guard()?;
        self.terminate(&mut inner, TransactionState::RolledBack);
        info!(target: "archivum::txn", tx = %self.id, "Rolled back transaction");
        Ok(())
    }

    /// Extend a long-lived transaction's deadline
    pub fn refresh(&self) -> Result<Timestamp> {
        let mut inner = self.open_guard()?;
        if inner.short_lived {
            return Err(RepositoryError::bad_request(format!(
                "Transaction {} is short-lived and cannot be refreshed",
                self.id
            )));
        }
        inner.expiration = self.clock.now().saturating_add(self.session_timeout);
        debug!(target: "archivum::txn", tx = %self.id, expiration = %inner.expiration, "Refreshed transaction");
        Ok(inner.expiration)
    }

    /// Forcibly end the transaction
    ///
    /// An open transaction is rolled back and becomes EXPIRED. A terminal one
    /// is left as it is.
    pub fn expire(&self) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return;
        }
        self.terminate(&mut inner, TransactionState::Expired);
        inner.expiration = self.clock.now();
        debug!(target: "archivum::txn", tx = %self.id, "Expired transaction");
    }

    /// Expire if the deadline has passed; returns whether it did
    pub fn expire_if_past_deadline(&self) -> bool {
        let mut inner = self.inner.lock();
        if !self.past_deadline(&inner) {
            return false;
        }
        warn!(target: "archivum::txn", tx = %self.id, "Transaction expired without refresh");
        self.terminate(&mut inner, TransactionState::Expired);
        true
    }

    /// Acquire an EXCLUSIVE lock for the lifetime of the transaction
    pub fn lock_resource(&self, id: &ResourceId) -> Result<()> {
        self.acquire_lock(id, LockMode::Exclusive)
    }

    /// Acquire a SHARED lock for the lifetime of the transaction
    pub fn lock_resource_non_exclusive(&self, id: &ResourceId) -> Result<()> {
        self.acquire_lock(id, LockMode::Shared)
    }

    /// The state mutex is not held while waiting on the lock table, so expiry
    /// and state queries proceed during a contended wait.
    fn acquire_lock(&self, id: &ResourceId, mode: LockMode) -> Result<()> {
        drop(self.open_guard()?);
        self.locks.acquire(&self.id, id, mode)?;

        let inner = self.open_guard();
        if let Err(e) = inner {
            // closed while waiting
            self.locks.release_all(&self.id);
            debug!(target: "archivum::lock", tx = %self.id, resource = %id, "Dropped lock granted after close");
            return Err(e);
        }
        Ok(())
    }

    /// Release locks at the end of a request; long-lived transactions keep them
    pub fn release_resource_locks_if_short_lived(&self) {
        if self.is_short_lived() {
            self.locks.release_all(&self.id);
        }
    }

    /// Resources locked by this transaction
    pub fn held_locks(&self) -> Vec<ResourceId> {
        self.locks.held_by(&self.id)
    }

    /// Stage a mutation in the storage session
    pub fn persist(&self, operation: ResourceOperation) -> Result<()> {
        let _inner = self.open_guard()?;
        self.session.lock().persist(operation)
    }

    /// Read through the storage session, seeing this transaction's writes
    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&dyn PersistentStorageSession) -> Result<T>,
    ) -> Result<T> {
        let _inner = self.open_guard()?;
        let session = self.session.lock();
        f(&**session)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("short_lived", &inner.short_lived)
            .field("expiration", &inner.expiration)
            .finish()
    }
}
