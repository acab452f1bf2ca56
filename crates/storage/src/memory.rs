//! In-memory versioned storage backend
//!
//! Each stored id (base resource, binary description or ACL) maps to a
//! [`ResourceRecord`]: the current head plus an ascending version chain.
//!
//! # Design Notes
//!
//! - **One write lock per commit**: staged operations are replayed and
//!   installed under a single `RwLock` write guard, so a commit is atomic with
//!   respect to every other session.
//! - **Strictly increasing instants**: commit instants come from the clock but
//!   are bumped by one microsecond when the clock has not moved, so two
//!   versions never share an instant.
//! - **Read-your-writes**: a session replays each operation into a private
//!   overlay as it is persisted; reads consult the overlay first.
//! - **Sealed after completion**: once committed or rolled back a session
//!   rejects every further call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use archivum_core::{
    Graph, InteractionModel, OperationBody, OperationType, RepositoryError, ResourceHeaders,
    ResourceId, ResourceOperation, Result, Timestamp,
};

use crate::clock::{Clock, SystemClock};
use crate::session::{PersistentStorageSession, StorageBackend};

/// Headers, triples and content of a resource at one point in time
#[derive(Debug, Clone)]
pub struct ResourceState {
    headers: ResourceHeaders,
    triples: Graph,
    content: Option<Arc<Vec<u8>>>,
}

/// Head and version chain of one stored id
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    head: ResourceState,
    /// Ascending by instant
    versions: Vec<(Timestamp, ResourceState)>,
}

impl ResourceRecord {
    fn new(head: ResourceState) -> Self {
        Self {
            head,
            versions: Vec::new(),
        }
    }

    fn state(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<&ResourceState> {
        match version {
            None => Ok(&self.head),
            Some(instant) => self
                .versions
                .binary_search_by_key(&instant, |(ts, _)| *ts)
                .map(|idx| &self.versions[idx].1)
                .map_err(|_| {
                    RepositoryError::NotFound(format!("No version of {} at {}", id, instant))
                }),
        }
    }

    /// Append a memento of the head; a second snapshot at the same instant
    /// replaces the first.
    fn push_version(&mut self, instant: Timestamp) {
        let mut snapshot = self.head.clone();
        snapshot.headers = self.head.headers.as_memento(instant);
        match self.versions.last_mut() {
            Some((last, state)) if *last == instant => *state = snapshot,
            _ => {
                debug_assert!(self
                    .versions
                    .last()
                    .map_or(true, |(last, _)| last.is_before(instant)));
                self.versions.push((instant, snapshot));
            }
        }
    }

    /// Whether the head differs from its latest memento
    fn changed_since_version(&self) -> bool {
        self.versions.last().map_or(true, |(last, state)| {
            state.headers != self.head.headers.as_memento(*last)
                || state.triples != self.head.triples
                || state.content != self.head.content
        })
    }

    fn instants(&self) -> Vec<Timestamp> {
        self.versions.iter().map(|(ts, _)| *ts).collect()
    }

    fn is_deleted(&self) -> bool {
        self.head.headers.deleted
    }
}

type RecordMap = FxHashMap<ResourceId, ResourceRecord>;
type ChangeSet = FxHashMap<ResourceId, Option<ResourceRecord>>;

struct StoreInner {
    records: RwLock<RecordMap>,
    clock: Arc<dyn Clock>,
    last_instant: Mutex<Timestamp>,
    auto_versioning: AtomicBool,
}

impl StoreInner {
    /// Allocate a commit instant; callers hold the records write lock
    fn next_instant(&self) -> Timestamp {
        let mut last = self.last_instant.lock();
        let now = self.clock.now();
        let ts = if now.is_after(*last) { now } else { last.next() };
        *last = ts;
        ts
    }

    /// Instant the next commit would get, without allocating it
    fn peek_instant(&self) -> Timestamp {
        let last = *self.last_instant.lock();
        let now = self.clock.now();
        if now.is_after(last) {
            now
        } else {
            last.next()
        }
    }

    fn auto_versioning(&self) -> bool {
        self.auto_versioning.load(Ordering::Relaxed)
    }
}

/// In-memory [`StorageBackend`]
///
/// Cheap to clone; clones share the same records.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<StoreInner>,
}

impl MemoryStorage {
    /// Empty repository (root container only) on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty repository on a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let root = ResourceId::root();
        let mut headers =
            ResourceHeaders::new(root.clone(), None, InteractionModel::BasicContainer, None, now);
        headers.object_root = true;
        let mut records = RecordMap::default();
        records.insert(
            root,
            ResourceRecord::new(ResourceState {
                headers,
                triples: Graph::new(),
                content: None,
            }),
        );
        Self {
            inner: Arc::new(StoreInner {
                records: RwLock::new(records),
                clock,
                last_instant: Mutex::new(now),
                auto_versioning: AtomicBool::new(false),
            }),
        }
    }

    /// When enabled, every committed create or update also appends a memento
    pub fn set_auto_versioning(&self, enabled: bool) {
        self.inner.auto_versioning.store(enabled, Ordering::Relaxed);
    }

    /// Whether a record (live or tombstoned) exists for `id`
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.inner.records.read().contains_key(&id.original())
    }

    /// Number of stored records, tombstones included
    pub fn record_count(&self) -> usize {
        self.inner.records.read().len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("records", &self.record_count())
            .field("auto_versioning", &self.inner.auto_versioning())
            .finish()
    }
}

impl StorageBackend for MemoryStorage {
    fn open_session(&self, tx_id: &str) -> Box<dyn PersistentStorageSession> {
        Box::new(MemorySession::new(
            Arc::clone(&self.inner),
            Some(tx_id.to_string()),
        ))
    }

    fn read_only_session(&self) -> Box<dyn PersistentStorageSession> {
        Box::new(MemorySession::new(Arc::clone(&self.inner), None))
    }
}

// ============================================================================
// Workspace: committed records plus a change set
// ============================================================================

struct Workspace<'a> {
    base: &'a RecordMap,
    changes: ChangeSet,
}

impl<'a> Workspace<'a> {
    fn new(base: &'a RecordMap, changes: ChangeSet) -> Self {
        Self { base, changes }
    }

    fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        match self.changes.get(id) {
            Some(entry) => entry.as_ref(),
            None => self.base.get(id),
        }
    }

    fn get_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceRecord> {
        if !self.changes.contains_key(id) {
            let record = self.base.get(id)?.clone();
            self.changes.insert(id.clone(), Some(record));
        }
        self.changes.get_mut(id).and_then(|entry| entry.as_mut())
    }

    fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .base
            .keys()
            .filter(|id| !self.changes.contains_key(*id))
            .cloned()
            .collect();
        ids.extend(
            self.changes
                .iter()
                .filter(|(_, entry)| entry.is_some())
                .map(|(id, _)| id.clone()),
        );
        ids
    }

    fn existing(&self, id: &ResourceId) -> Result<&ResourceRecord> {
        self.get(id).ok_or_else(|| RepositoryError::not_found(id))
    }

    fn live(&self, id: &ResourceId) -> Result<&ResourceRecord> {
        let record = self.existing(id)?;
        if record.is_deleted() {
            return Err(RepositoryError::Gone(id.to_string()));
        }
        Ok(record)
    }

    fn live_mut(&mut self, id: &ResourceId) -> Result<&mut ResourceRecord> {
        self.live(id)?;
        self.get_mut(id).ok_or_else(|| RepositoryError::not_found(id))
    }

    fn apply(&mut self, op: &ResourceOperation, instant: Timestamp, auto_versioning: bool) -> Result<()> {
        let id = &op.resource_id;
        if !matches!(id.version_segment(), archivum_core::VersionSegment::None) {
            return Err(RepositoryError::bad_request(format!(
                "Cannot mutate {} directly",
                id
            )));
        }
        let principal = op.user_principal.as_deref();

        match &op.body {
            OperationBody::CreateRdf {
                parent,
                interaction_model,
                triples,
                archival_group,
            } => {
                let archival_group_id = self.check_create(id, parent)?;
                if *archival_group && archival_group_id.is_some() {
                    return Err(RepositoryError::Constraint(format!(
                        "Archival group {} cannot be nested inside another archival group",
                        id
                    )));
                }
                let mut headers = ResourceHeaders::new(
                    id.clone(),
                    Some(parent.clone()),
                    *interaction_model,
                    principal,
                    instant,
                );
                headers.archival_group = *archival_group;
                headers.object_root = archival_group_id.is_none()
                    && *interaction_model == InteractionModel::BasicContainer;
                headers.archival_group_id = archival_group_id;
                self.changes.insert(
                    id.clone(),
                    Some(ResourceRecord::new(ResourceState {
                        headers,
                        triples: triples.clone(),
                        content: None,
                    })),
                );
            }
            OperationBody::CreateBinary {
                parent,
                content,
                mime_type,
                filename,
                digests,
            } => {
                let archival_group_id = self.check_create(id, parent)?;
                let mut headers = ResourceHeaders::new(
                    id.clone(),
                    Some(parent.clone()),
                    InteractionModel::NonRdfSource,
                    principal,
                    instant,
                );
                headers.mime_type = mime_type.clone();
                headers.filename = filename.clone();
                headers.content_size = Some(content.len() as u64);
                headers.digests = digests.clone();
                headers.object_root = archival_group_id.is_none();
                headers.archival_group_id = archival_group_id.clone();

                let description_id = id.as_description();
                let mut description = ResourceHeaders::new(
                    description_id.clone(),
                    Some(id.clone()),
                    InteractionModel::NonRdfSourceDescription,
                    principal,
                    instant,
                );
                description.archival_group_id = archival_group_id;

                self.changes.insert(
                    id.clone(),
                    Some(ResourceRecord::new(ResourceState {
                        headers,
                        triples: Graph::new(),
                        content: Some(Arc::new(content.clone())),
                    })),
                );
                self.changes.insert(
                    description_id,
                    Some(ResourceRecord::new(ResourceState {
                        headers: description,
                        triples: Graph::new(),
                        content: None,
                    })),
                );
            }
            OperationBody::ReplaceProperties { triples } => {
                let record = self.live_mut(id)?;
                if !record.head.headers.interaction_model.is_rdf() {
                    return Err(RepositoryError::bad_request(format!(
                        "{} is a binary; replace the properties of its description",
                        id
                    )));
                }
                record.head.triples = triples.clone();
                record.head.headers.touch(principal, instant);
            }
            OperationBody::ReplaceBinary {
                content,
                mime_type,
                filename,
            } => {
                let record = self.live_mut(id)?;
                if record.head.headers.interaction_model != InteractionModel::NonRdfSource {
                    return Err(RepositoryError::bad_request(format!("{} is not a binary", id)));
                }
                record.head.content = Some(Arc::new(content.clone()));
                let headers = &mut record.head.headers;
                headers.content_size = Some(content.len() as u64);
                if mime_type.is_some() {
                    headers.mime_type = mime_type.clone();
                }
                if filename.is_some() {
                    headers.filename = filename.clone();
                }
                headers.touch(principal, instant);
            }
            OperationBody::CreateVersion => {
                let root = self.version_root(id)?;
                self.snapshot(&root, id, instant)?;
            }
            OperationBody::Delete => {
                let record = self.live_mut(id)?;
                record.head.headers.deleted = true;
                record.head.headers.touch(principal, instant);
            }
            OperationBody::Purge => {
                self.existing(id)?;
                self.changes.insert(id.clone(), None);
            }
        }

        if auto_versioning
            && matches!(
                op.operation_type(),
                OperationType::Create | OperationType::Update
            )
        {
            let root = self.version_root(id)?;
            self.snapshot(&root, id, instant)?;
        }
        Ok(())
    }

    /// Validate a create and return the archival group the new resource joins
    fn check_create(&self, id: &ResourceId, parent: &ResourceId) -> Result<Option<ResourceId>> {
        if let Some(existing) = self.get(id) {
            if existing.is_deleted() {
                return Err(RepositoryError::Gone(id.to_string()));
            }
            return Err(RepositoryError::Conflict(format!("{} already exists", id)));
        }
        let parent_record = self.existing(parent)?;
        if parent_record.is_deleted() {
            return Err(RepositoryError::bad_request(format!(
                "Cannot create {} inside deleted resource {}",
                id, parent
            )));
        }
        let headers = &parent_record.head.headers;
        if headers.archival_group {
            Ok(Some(headers.id.clone()))
        } else {
            Ok(headers.archival_group_id.clone())
        }
    }

    /// Resource whose versioning snapshots `id`
    ///
    /// Descriptions version with their binary; archival group members version
    /// with the group root.
    fn version_root(&self, id: &ResourceId) -> Result<ResourceId> {
        let record = self.live(id)?;
        if let Some(group) = &record.head.headers.archival_group_id {
            return Ok(group.clone());
        }
        if id.is_description() {
            return Ok(id.base_id());
        }
        Ok(id.clone())
    }

    /// Record mementos at `instant` for the version unit rooted at `root`
    ///
    /// The root (and its description) always gets one, as does `requested`.
    /// Other archival group members only get one when they changed since
    /// their latest memento; a binary and its description count as one.
    fn snapshot(&mut self, root: &ResourceId, requested: &ResourceId, instant: Timestamp) -> Result<()> {
        let record = self.live(root)?;
        let mut targets = vec![root.clone()];
        if record.head.headers.interaction_model == InteractionModel::NonRdfSource {
            targets.push(root.as_description());
        }
        if record.head.headers.archival_group {
            let changed = |id: &ResourceId| self.get(id).map_or(false, |r| r.changed_since_version());
            let mut members: Vec<ResourceId> = self
                .ids()
                .into_iter()
                .filter(|candidate| {
                    self.get(candidate).map_or(false, |r| {
                        !r.is_deleted() && r.head.headers.archival_group_id.as_ref() == Some(root)
                    })
                })
                .filter(|candidate| {
                    let base = candidate.base_id();
                    base == requested.base_id()
                        || changed(candidate)
                        || changed(&base)
                        || changed(&base.as_description())
                })
                .collect();
            members.sort();
            targets.extend(members);
        }
        for target in targets {
            if let Some(record) = self.get_mut(&target) {
                record.push_version(instant);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Prepared,
    Committed,
    RolledBack,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Prepared => "prepared",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled back",
        }
    }
}

/// Session over [`MemoryStorage`]
pub struct MemorySession {
    tx_id: Option<String>,
    store: Arc<StoreInner>,
    staged: Vec<ResourceOperation>,
    pending: ChangeSet,
    state: SessionState,
}

impl MemorySession {
    fn new(store: Arc<StoreInner>, tx_id: Option<String>) -> Self {
        Self {
            tx_id,
            store,
            staged: Vec::new(),
            pending: ChangeSet::default(),
            state: SessionState::Open,
        }
    }

    fn label(&self) -> &str {
        self.tx_id.as_deref().unwrap_or("read-only")
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open | SessionState::Prepared => Ok(()),
            terminal => Err(RepositoryError::TransactionClosed {
                id: self.label().to_string(),
                state: terminal.name().to_string(),
            }),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.tx_id.is_none() {
            return Err(RepositoryError::bad_request(
                "Read-only session cannot stage operations",
            ));
        }
        Ok(())
    }

    fn with_record<T>(
        &self,
        id: &ResourceId,
        f: impl FnOnce(&ResourceRecord) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let key = id.original();
        if let Some(entry) = self.pending.get(&key) {
            return match entry {
                Some(record) => f(record),
                None => Err(RepositoryError::not_found(id)),
            };
        }
        let records = self.store.records.read();
        match records.get(&key) {
            Some(record) => f(record),
            None => Err(RepositoryError::not_found(id)),
        }
    }

    fn replay(&self, base: &RecordMap, instant: Timestamp) -> Result<ChangeSet> {
        let auto = self.store.auto_versioning();
        let mut workspace = Workspace::new(base, ChangeSet::default());
        for op in &self.staged {
            workspace.apply(op, instant, auto)?;
        }
        Ok(workspace.changes)
    }
}

impl PersistentStorageSession for MemorySession {
    fn id(&self) -> Option<&str> {
        self.tx_id.as_deref()
    }

    fn persist(&mut self, operation: ResourceOperation) -> Result<()> {
        self.ensure_writable()?;
        let instant = self.store.peek_instant();
        let auto = self.store.auto_versioning();
        let changes = {
            let records = self.store.records.read();
            let mut workspace = Workspace::new(&records, self.pending.clone());
            workspace.apply(&operation, instant, auto)?;
            workspace.changes
        };
        debug!(
            target: "archivum::storage",
            tx = self.label(),
            resource = %operation.resource_id,
            op = %operation.operation_type(),
            "Staged operation"
        );
        self.pending = changes;
        self.staged.push(operation);
        self.state = SessionState::Open;
        Ok(())
    }

    fn get_headers(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<ResourceHeaders> {
        self.with_record(id, |record| Ok(record.state(id, version)?.headers.clone()))
    }

    fn get_triples(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<Graph> {
        self.with_record(id, |record| {
            let state = record.state(id, version)?;
            if !state.headers.interaction_model.is_rdf() {
                return Err(RepositoryError::bad_request(format!(
                    "{} is a binary and has no triples",
                    id
                )));
            }
            Ok(state.triples.clone())
        })
    }

    fn get_binary_content(&self, id: &ResourceId, version: Option<Timestamp>) -> Result<Vec<u8>> {
        self.with_record(id, |record| {
            let state = record.state(id, version)?;
            state
                .content
                .as_ref()
                .map(|bytes| bytes.as_ref().clone())
                .ok_or_else(|| RepositoryError::bad_request(format!("{} is not a binary", id)))
        })
    }

    fn get_binary_range(
        &self,
        id: &ResourceId,
        version: Option<Timestamp>,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>> {
        self.with_record(id, |record| {
            let state = record.state(id, version)?;
            let bytes = state
                .content
                .as_ref()
                .ok_or_else(|| RepositoryError::bad_request(format!("{} is not a binary", id)))?;
            let len = bytes.len() as u64;
            if start > end || start >= len {
                return Err(RepositoryError::bad_request(format!(
                    "Range {}-{} not satisfiable for {} bytes",
                    start, end, len
                )));
            }
            let end = end.min(len - 1);
            Ok(bytes[start as usize..=end as usize].to_vec())
        })
    }

    fn list_versions(&self, id: &ResourceId) -> Result<Vec<Timestamp>> {
        self.with_record(id, |record| Ok(record.instants()))
    }

    fn prepare(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.tx_id.is_some() {
            let instant = self.store.peek_instant();
            let records = self.store.records.read();
            if let Err(e) = self.replay(&records, instant) {
                warn!(target: "archivum::storage", tx = self.label(), error = %e, "Prepare failed");
                return Err(e);
            }
        }
        self.state = SessionState::Prepared;
        Ok(())
    }

    fn commit(&mut self) -> Result<Timestamp> {
        self.ensure_writable()?;
        if self.state != SessionState::Prepared {
            return Err(RepositoryError::storage(format!(
                "Session {} must be prepared before commit",
                self.label()
            )));
        }
        let mut records = self.store.records.write();
        let instant = self.store.next_instant();
        let changes = self.replay(&records, instant)?;
        let touched = changes.len();
        for (id, entry) in changes {
            match entry {
                Some(record) => {
                    records.insert(id, record);
                }
                None => {
                    records.remove(&id);
                }
            }
        }
        drop(records);

        debug!(
            target: "archivum::storage",
            tx = self.label(),
            operations = self.staged.len(),
            records = touched,
            instant = %instant,
            "Committed session"
        );
        self.staged.clear();
        self.pending.clear();
        self.state = SessionState::Committed;
        Ok(instant)
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!(
            target: "archivum::storage",
            tx = self.label(),
            discarded = self.staged.len(),
            "Rolled back session"
        );
        self.staged.clear();
        self.pending.clear();
        if self.tx_id.is_some() {
            self.state = SessionState::RolledBack;
        }
        Ok(())
    }
}
