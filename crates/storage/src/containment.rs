//! Temporal containment index
//!
//! Records `(parent, child, start, end)`: `start` is the commit instant that
//! added the child, `end` the commit instant that deleted it. Purge removes
//! the records altogether. Changes are staged per transaction and applied as
//! a [`TransactionParticipant`].
//!
//! Queries that take a transaction id see that transaction's staged changes
//! on top of the committed state; [`ContainmentIndex::contains_at`] answers
//! for a past instant and is what memento containment snapshots use.

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use archivum_core::{ResourceId, Result, Timestamp};

use crate::participant::TransactionParticipant;

#[derive(Debug, Clone)]
struct ContainmentRecord {
    child: ResourceId,
    start: Timestamp,
    end: Option<Timestamp>,
}

impl ContainmentRecord {
    fn is_live(&self) -> bool {
        self.end.is_none()
    }

    fn live_at(&self, instant: Timestamp) -> bool {
        !self.start.is_after(instant) && self.end.map_or(true, |end| instant.is_before(end))
    }
}

#[derive(Debug, Clone)]
enum StagedChange {
    Add { parent: ResourceId, child: ResourceId },
    Remove { child: ResourceId },
    Purge { id: ResourceId },
}

#[derive(Debug, Default)]
struct Committed {
    /// Records per parent, in insertion order
    by_parent: FxHashMap<ResourceId, Vec<ContainmentRecord>>,
    parent_of: FxHashMap<ResourceId, ResourceId>,
}

/// Parent/child relationships over time
#[derive(Debug, Default)]
pub struct ContainmentIndex {
    committed: RwLock<Committed>,
    staged: DashMap<String, Vec<StagedChange>>,
}

impl ContainmentIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&self, tx_id: &str, change: StagedChange) {
        self.staged.entry(tx_id.to_string()).or_default().push(change);
    }

    fn staged_for(&self, tx_id: Option<&str>) -> Vec<StagedChange> {
        tx_id
            .and_then(|tx| self.staged.get(tx).map(|changes| changes.value().clone()))
            .unwrap_or_default()
    }

    /// Stage `child` as a new member of `parent`
    pub fn add_containment(&self, tx_id: &str, parent: &ResourceId, child: &ResourceId) {
        self.stage(
            tx_id,
            StagedChange::Add {
                parent: parent.base_id(),
                child: child.base_id(),
            },
        );
    }

    /// Stage the end of `child`'s containment (delete)
    pub fn remove_containment(&self, tx_id: &str, child: &ResourceId) {
        self.stage(
            tx_id,
            StagedChange::Remove {
                child: child.base_id(),
            },
        );
    }

    /// Stage removal of every record mentioning `id` as a child (purge)
    pub fn purge_resource(&self, tx_id: &str, id: &ResourceId) {
        self.stage(tx_id, StagedChange::Purge { id: id.base_id() });
    }

    /// Live children of `parent`, including staged changes of `tx_id`
    pub fn contains(&self, tx_id: Option<&str>, parent: &ResourceId) -> Vec<ResourceId> {
        let parent = parent.base_id();
        let mut children: Vec<ResourceId> = {
            let committed = self.committed.read();
            committed
                .by_parent
                .get(&parent)
                .map(|records| {
                    records
                        .iter()
                        .filter(|r| r.is_live())
                        .map(|r| r.child.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        for change in self.staged_for(tx_id) {
            match change {
                StagedChange::Add { parent: p, child } if p == parent => {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
                StagedChange::Remove { child } | StagedChange::Purge { id: child } => {
                    children.retain(|c| c != &child);
                }
                StagedChange::Add { .. } => {}
            }
        }
        children
    }

    /// Children of `parent` that were deleted but not yet purged
    pub fn contains_deleted(&self, tx_id: Option<&str>, parent: &ResourceId) -> Vec<ResourceId> {
        let parent = parent.base_id();
        let (mut deleted, live): (Vec<ResourceId>, Vec<ResourceId>) = {
            let committed = self.committed.read();
            let records = committed.by_parent.get(&parent);
            let ended: Vec<ResourceId> = records
                .map(|rs| rs.iter().filter(|r| !r.is_live()).map(|r| r.child.clone()).collect())
                .unwrap_or_default();
            let live: Vec<ResourceId> = records
                .map(|rs| rs.iter().filter(|r| r.is_live()).map(|r| r.child.clone()).collect())
                .unwrap_or_default();
            (ended, live)
        };
        let mut staged_added: Vec<ResourceId> = Vec::new();
        for change in self.staged_for(tx_id) {
            match change {
                StagedChange::Add { parent: p, child } if p == parent => staged_added.push(child),
                StagedChange::Add { .. } => {}
                StagedChange::Remove { child } => {
                    if (live.contains(&child) || staged_added.contains(&child))
                        && !deleted.contains(&child)
                    {
                        deleted.push(child);
                    }
                }
                StagedChange::Purge { id } => deleted.retain(|c| c != &id),
            }
        }
        deleted
    }

    /// Children of `parent` as of `instant`, committed state only
    pub fn contains_at(&self, parent: &ResourceId, instant: Timestamp) -> Vec<ResourceId> {
        let committed = self.committed.read();
        committed
            .by_parent
            .get(&parent.base_id())
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.live_at(instant))
                    .map(|r| r.child.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Parent of `child`, including staged changes of `tx_id`
    pub fn container_of(&self, tx_id: Option<&str>, child: &ResourceId) -> Option<ResourceId> {
        let child = child.base_id();
        let mut parent = self.committed.read().parent_of.get(&child).cloned();
        for change in self.staged_for(tx_id) {
            match change {
                StagedChange::Add { parent: p, child: c } if c == child => parent = Some(p),
                StagedChange::Purge { id } if id == child => parent = None,
                _ => {}
            }
        }
        parent
    }

    /// Whether `parent` has any live child
    pub fn has_children(&self, tx_id: Option<&str>, parent: &ResourceId) -> bool {
        !self.contains(tx_id, parent).is_empty()
    }

    /// Whether `tx_id` has staged changes
    pub fn has_staged(&self, tx_id: &str) -> bool {
        self.staged.get(tx_id).map_or(false, |changes| !changes.is_empty())
    }
}

impl TransactionParticipant for ContainmentIndex {
    fn name(&self) -> &'static str {
        "containment"
    }

    fn commit(&self, tx_id: &str, instant: Timestamp) -> Result<()> {
        let Some((_, changes)) = self.staged.remove(tx_id) else {
            return Ok(());
        };
        let count = changes.len();
        let mut committed = self.committed.write();
        for change in changes {
            match change {
                StagedChange::Add { parent, child } => {
                    let records = committed.by_parent.entry(parent.clone()).or_default();
                    if !records.iter().any(|r| r.child == child && r.is_live()) {
                        records.push(ContainmentRecord {
                            child: child.clone(),
                            start: instant,
                            end: None,
                        });
                    }
                    committed.parent_of.insert(child, parent);
                }
                StagedChange::Remove { child } => {
                    if let Some(parent) = committed.parent_of.get(&child).cloned() {
                        if let Some(records) = committed.by_parent.get_mut(&parent) {
                            for record in records.iter_mut().filter(|r| r.child == child && r.is_live()) {
                                record.end = Some(instant);
                            }
                        }
                    }
                }
                StagedChange::Purge { id } => {
                    if let Some(parent) = committed.parent_of.remove(&id) {
                        if let Some(records) = committed.by_parent.get_mut(&parent) {
                            records.retain(|r| r.child != id);
                        }
                    }
                    if let Some(records) = committed.by_parent.remove(&id) {
                        for record in records {
                            committed.parent_of.remove(&record.child);
                        }
                    }
                }
            }
        }
        debug!(target: "archivum::storage", tx = tx_id, changes = count, "Committed containment changes");
        Ok(())
    }

    fn rollback(&self, tx_id: &str) {
        self.staged.remove(tx_id);
    }
}
