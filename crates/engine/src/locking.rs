//! Resource locking policy
//!
//! Every mutation path goes through [`ResourceLocker`] before staging
//! anything, so the lock set for an operation is decided in one place:
//!
//! 1. A resource inside an Archival Group also locks the group root
//!    EXCLUSIVELY.
//! 2. The mutated resource itself is locked EXCLUSIVELY.
//! 3. Adding a child locks the group root EXCLUSIVELY if the parent is in a
//!    group, the parent EXCLUSIVELY if it is a group root, and the parent
//!    SHARED otherwise.
//! 4. Delete and purge lock the description and ACL companions with their
//!    primary resource.
//!
//! Group roots are always locked before members.

use tracing::debug;

use archivum_concurrency::Transaction;
use archivum_core::{InteractionModel, ResourceHeaders, ResourceId, Result};

/// Applies the locking policy to a transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLocker;

impl ResourceLocker {
    /// New locker
    pub fn new() -> Self {
        Self
    }

    /// Lock `id` for an in-place mutation (rules 1 and 2)
    ///
    /// A description also locks its binary, which it versions with.
    pub fn lock_for_update(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        headers: &ResourceHeaders,
    ) -> Result<()> {
        self.lock_group_root(tx, headers)?;
        if id.is_description() {
            tx.lock_resource(&id.base_id())?;
        }
        debug!(target: "archivum::lock", tx = %tx.id(), resource = %id, "Locking for update");
        tx.lock_resource(id)
    }

    /// Lock the parent of a resource being created (rule 3)
    ///
    /// The repository root is never locked.
    pub fn lock_for_child_add(
        &self,
        tx: &Transaction,
        parent: &ResourceId,
        parent_headers: &ResourceHeaders,
    ) -> Result<()> {
        if parent.is_repository_root() {
            return Ok(());
        }
        if let Some(group) = &parent_headers.archival_group_id {
            debug!(target: "archivum::lock", tx = %tx.id(), group = %group, "Locking group root for child add");
            tx.lock_resource(group)
        } else if parent_headers.archival_group {
            debug!(target: "archivum::lock", tx = %tx.id(), group = %parent, "Locking group root for child add");
            tx.lock_resource(parent)
        } else {
            tx.lock_resource_non_exclusive(parent)
        }
    }

    /// Lock a resource with its companions for delete or purge (rules 1, 2
    /// and 4)
    pub fn lock_for_removal(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        headers: &ResourceHeaders,
    ) -> Result<()> {
        self.lock_group_root(tx, headers)?;
        tx.lock_resource(id)?;
        if headers.interaction_model == InteractionModel::NonRdfSource {
            tx.lock_resource(&id.as_description())?;
        }
        if !id.is_acl() {
            tx.lock_resource(&id.as_acl())?;
        }
        debug!(target: "archivum::lock", tx = %tx.id(), resource = %id, "Locked for removal");
        Ok(())
    }

    fn lock_group_root(&self, tx: &Transaction, headers: &ResourceHeaders) -> Result<()> {
        match &headers.archival_group_id {
            Some(group) => tx.lock_resource(group),
            None => Ok(()),
        }
    }
}
