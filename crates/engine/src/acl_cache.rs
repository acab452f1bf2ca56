//! Process-wide cache of effective ACLs
//!
//! Maps a resource to the ACL that governs it (its own, or the nearest
//! ancestor's). Entries are loaded on demand from committed state. Staging
//! an ACL change only marks the transaction; the cache is flushed when that
//! transaction commits.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use tracing::debug;

use archivum_concurrency::TransactionParticipant;
use archivum_core::{Graph, ResourceId, Result, Timestamp};

/// Effective ACL of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclHandle {
    /// The `fcr:acl` resource that applies
    pub acl_id: ResourceId,
    /// Authorization triples
    pub authorizations: Graph,
}

/// Shared effective-ACL cache
#[derive(Debug, Default)]
pub struct AclCache {
    entries: DashMap<ResourceId, Option<AclHandle>>,
    invalidations: AtomicU64,
    changed: DashSet<String>,
}

impl AclCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry for `resource`, computing it with `load` on a miss
    ///
    /// Load errors are returned and nothing is cached. A value loaded while
    /// an invalidation ran is returned but not kept.
    pub fn get_or_load(
        &self,
        resource: &ResourceId,
        load: impl FnOnce() -> Result<Option<AclHandle>>,
    ) -> Result<Option<AclHandle>> {
        let key = resource.base_id();
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.value().clone());
        }
        let generation = self.invalidations.load(Ordering::Acquire);
        let loaded = load()?;
        if self.invalidations.load(Ordering::Acquire) == generation {
            self.entries.insert(key, loaded.clone());
        }
        Ok(loaded)
    }

    /// Record that `tx_id` staged an ACL change
    pub fn mark_changed(&self, tx_id: &str) {
        self.changed.insert(tx_id.to_string());
    }

    /// Whether `tx_id` has an ACL change waiting for commit
    pub fn has_pending(&self, tx_id: &str) -> bool {
        self.changed.contains(tx_id)
    }

    /// Drop the entry for one resource
    pub fn invalidate(&self, resource: &ResourceId) {
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        self.entries.remove(&resource.base_id());
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        self.invalidations.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many invalidations have happened
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Acquire)
    }
}

impl TransactionParticipant for AclCache {
    fn name(&self) -> &'static str {
        "acl-cache"
    }

    fn commit(&self, tx_id: &str, _instant: Timestamp) -> Result<()> {
        if self.changed.remove(tx_id).is_some() {
            debug!(target: "archivum::storage", tx = tx_id, "Flushing ACL cache");
            self.invalidate_all();
        }
        Ok(())
    }

    fn rollback(&self, tx_id: &str) {
        self.changed.remove(tx_id);
    }
}
