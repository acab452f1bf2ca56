//! Storage session contract
//!
//! A [`PersistentStorageSession`] is owned by exactly one transaction. Reads go
//! through it with an optional version instant; writes are staged with
//! [`persist`](PersistentStorageSession::persist) and only become visible to
//! other sessions after [`commit`](PersistentStorageSession::commit).
//!
//! ```text
//! persist* ──► prepare ──► commit      (success)
//!                 │
//!                 └─(Err)─► rollback   (never commit after a failed prepare)
//! ```

use archivum_core::{Graph, ResourceHeaders, ResourceId, ResourceOperation, Result, Timestamp};

/// Per-transaction storage access
///
/// `version = None` always means the current head. A `Some(instant)` must be
/// one of the instants returned by [`list_versions`](Self::list_versions),
/// otherwise the read fails as not found.
pub trait PersistentStorageSession: Send {
    /// Owning transaction id (`None` for a read-only session)
    fn id(&self) -> Option<&str>;

    /// Stage one mutation; applied in staging order at commit
    fn persist(&mut self, operation: ResourceOperation) -> Result<()>;

    /// Headers of a resource or one of its versions
    ///
    /// Deleted resources are still returned, with `deleted` set.
    fn get_headers(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<ResourceHeaders>;

    /// User triples of an RDF source
    fn get_triples(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<Graph>;

    /// Full binary content
    fn get_binary_content(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<Vec<u8>>;

    /// Bytes `start..=end` of a binary; `end` is clamped to the last byte
    fn get_binary_range(
        &self,
        id: &ResourceId,
        version: Option<Timestamp>,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>>;

    /// Version instants, strictly ascending; empty if never versioned
    fn list_versions(&self, id: &ResourceId) -> Result<Vec<Timestamp>>;

    /// Validate every staged operation against the committed state
    fn prepare(&mut self) -> Result<()>;

    /// Apply staged operations atomically and return the commit instant
    fn commit(&mut self) -> Result<Timestamp>;

    /// Discard staged operations
    fn rollback(&mut self) -> Result<()>;
}

/// Factory for sessions, keyed by transaction id
pub trait StorageBackend: Send + Sync {
    /// Writable session for a transaction
    fn open_session(&self, tx_id: &str) -> Box<dyn PersistentStorageSession>;

    /// Session that only reads committed state
    fn read_only_session(&self) -> Box<dyn PersistentStorageSession>;
}
