//! Archivum - transactional, Memento-versioned repository engine
//!
//! Archivum stores hierarchically identified resources (RDF containers,
//! binaries and their descriptions, ACLs), mutates them inside
//! transactions, and keeps immutable timestamped versions (mementos) that
//! can be retrieved by label or by datetime negotiation.
//!
//! # Quick Start
//!
//! ```ignore
//! use archivum::{Repository, RepositoryConfig, RequestContext, ResourceId, VersionRequest};
//! use archivum::Graph;
//!
//! let repo = Repository::new(RepositoryConfig::default())?;
//! let a = ResourceId::parse("a")?;
//!
//! // One request, one short-lived transaction, committed on success
//! repo.in_request(&RequestContext::new("a"), |tx| {
//!     repo.services().create_container(tx, &a, Graph::new(), false, None)
//! })?;
//!
//! // Version creation commits its own transaction
//! let memento = repo.in_request(&RequestContext::new("a/fcr:versions"), |tx| {
//!     repo.versioning().create_version(tx, &a, &VersionRequest::default(), None)
//! })?;
//! ```
//!
//! # Architecture
//!
//! - `archivum-core`: identifiers, headers, RDF model, operations, errors
//! - `archivum-storage`: storage sessions, in-memory backend, containment, events
//! - `archivum-concurrency`: locks, transactions, manager, sweeper
//! - `archivum-engine`: locking policy, services, versioning, delete, HTTP contract

use std::sync::Once;

pub use archivum_concurrency::{
    LockMode, LockTable, Transaction, TransactionManager, TransactionState, TransactionSweeper,
};
pub use archivum_core::{
    memento, rdf, Companion, ErrorKind, Graph, InteractionModel, OperationType, RepositoryError,
    ResourceHeaders, ResourceId, ResourceOperation, Result, Term, Timestamp, Triple,
    VersionSegment, ROOT_ID,
};
pub use archivum_engine::*;
pub use archivum_storage::{
    Clock, ContainmentIndex, EventSink, ManualClock, MemoryStorage, NoopEventSink,
    PersistentStorageSession, RecordingEventSink, ResourceEvent, StorageBackend, SystemClock,
};

static INIT_LOGGING: Once = Once::new();

/// Install a `tracing` fmt subscriber writing through the test harness
///
/// Safe to call more than once; only the first call installs anything, and
/// an already-installed global subscriber is left in place.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
