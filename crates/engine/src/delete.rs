//! Depth-first delete and purge
//!
//! Removal of a resource removes its whole containment subtree, children
//! before parents. The traversal is an explicit stack producing an ordered
//! list of removals, which are then locked and staged in that order.
//!
//! Per resource the order is:
//!
//! ```text
//! description (binaries only)
//! ACL companion (unless the resource is an ACL)
//! the resource itself
//! ```
//!
//! Delete leaves tombstones and skips children that are already
//! tombstoned. Purge erases everything, descending through tombstones too,
//! and is refused (405) below a deleted ancestor or on an Archival Group
//! member.

use std::sync::Arc;

use tracing::{debug, info};

use archivum_concurrency::Transaction;
use archivum_core::{
    Companion, InteractionModel, RepositoryError, ResourceHeaders, ResourceId,
    ResourceOperation, Result,
};
use archivum_storage::{ContainmentIndex, EventAccumulator};

use crate::acl_cache::AclCache;
use crate::locking::ResourceLocker;
use crate::resource::{Resource, ResourceFactory, ResourceKind};
use crate::services::stage;

/// Delete or purge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Leave a tombstone, keep history
    Delete,
    /// Erase the resource and its history
    Purge,
}

#[derive(Debug, Clone)]
struct Removal {
    id: ResourceId,
    headers: ResourceHeaders,
}

enum Step {
    Enter(ResourceId),
    Exit(ResourceId, ResourceHeaders),
}

/// Plans and applies subtree removals
pub struct DeleteOrchestrator {
    factory: Arc<ResourceFactory>,
    containment: Arc<ContainmentIndex>,
    events: Arc<EventAccumulator>,
    acl_cache: Arc<AclCache>,
    locker: ResourceLocker,
}

impl DeleteOrchestrator {
    /// Orchestrator over shared repository components
    pub fn new(
        factory: Arc<ResourceFactory>,
        containment: Arc<ContainmentIndex>,
        events: Arc<EventAccumulator>,
        acl_cache: Arc<AclCache>,
    ) -> Self {
        Self {
            factory,
            containment,
            events,
            acl_cache,
            locker: ResourceLocker::new(),
        }
    }

    /// Ordered operations that removing `target` would stage
    pub fn plan(
        &self,
        tx: &Transaction,
        target: &Resource,
        mode: DeleteMode,
        principal: Option<&str>,
    ) -> Result<Vec<ResourceOperation>> {
        Ok(self
            .removals(tx, target, mode)?
            .into_iter()
            .map(|r| operation(r.id, mode, principal))
            .collect())
    }

    /// Lock and stage the removal of `target` and its subtree
    ///
    /// Returns the removed ids in staging order.
    pub fn perform(
        &self,
        tx: &Transaction,
        target: &Resource,
        mode: DeleteMode,
        principal: Option<&str>,
    ) -> Result<Vec<ResourceId>> {
        let removals = self.removals(tx, target, mode)?;

        for removal in &removals {
            self.locker.lock_for_removal(tx, &removal.id, &removal.headers)?;
        }

        let mut acl_removed = target.is_acl();
        let mut removed = Vec::with_capacity(removals.len());
        for removal in removals {
            let id = removal.id;
            stage(tx, &self.events, operation(id.clone(), mode, principal))?;
            match (id.companion(), mode) {
                (Companion::None, DeleteMode::Delete) => {
                    self.containment.remove_containment(tx.id(), &id)
                }
                (Companion::None, DeleteMode::Purge) => {
                    self.containment.purge_resource(tx.id(), &id)
                }
                (Companion::Acl, _) => acl_removed = true,
                (Companion::Description, _) => {}
            }
            removed.push(id);
        }

        if acl_removed {
            self.acl_cache.mark_changed(tx.id());
        }
        info!(
            target: "archivum::delete",
            tx = %tx.id(),
            resource = %target.id(),
            mode = ?mode,
            count = removed.len(),
            "Staged removal"
        );
        Ok(removed)
    }

    fn removals(
        &self,
        tx: &Transaction,
        target: &Resource,
        mode: DeleteMode,
    ) -> Result<Vec<Removal>> {
        self.validate(tx, target, mode)?;
        let root = target.id().clone();

        let mut out = Vec::new();
        let mut stack = vec![Step::Enter(root.clone())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(id) => {
                    let headers = match self.factory.headers(Some(tx), &id) {
                        Ok(headers) => headers,
                        Err(e) if e.is_not_found() && id != root => continue,
                        Err(e) => return Err(e),
                    };
                    if mode == DeleteMode::Delete && headers.deleted && id != root {
                        debug!(target: "archivum::delete", resource = %id, "Skipping tombstoned child");
                        continue;
                    }
                    let children = if headers.interaction_model == InteractionModel::BasicContainer {
                        self.children(tx, &id, mode)
                    } else {
                        Vec::new()
                    };
                    stack.push(Step::Exit(id, headers));
                    stack.extend(children.into_iter().rev().map(Step::Enter));
                }
                Step::Exit(id, headers) => self.emit(tx, id, headers, mode, &mut out)?,
            }
        }
        Ok(out)
    }

    fn children(&self, tx: &Transaction, id: &ResourceId, mode: DeleteMode) -> Vec<ResourceId> {
        let mut children = self.containment.contains(Some(tx.id()), id);
        if mode == DeleteMode::Purge {
            for deleted in self.containment.contains_deleted(Some(tx.id()), id) {
                if !children.contains(&deleted) {
                    children.push(deleted);
                }
            }
        }
        children
    }

    fn emit(
        &self,
        tx: &Transaction,
        id: ResourceId,
        headers: ResourceHeaders,
        mode: DeleteMode,
        out: &mut Vec<Removal>,
    ) -> Result<()> {
        if headers.interaction_model == InteractionModel::NonRdfSource {
            let description = id.as_description();
            match self.factory.headers(Some(tx), &description) {
                Ok(h) if mode == DeleteMode::Purge || !h.deleted => out.push(Removal {
                    id: description,
                    headers: h,
                }),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if !id.is_acl() {
            if let Some(acl) = self
                .factory
                .acl_of(Some(tx), &id, mode == DeleteMode::Purge)?
            {
                if let Some(h) = acl.headers() {
                    out.push(Removal {
                        id: id.as_acl(),
                        headers: h.clone(),
                    });
                }
            }
        }
        out.push(Removal { id, headers });
        Ok(())
    }

    fn validate(&self, tx: &Transaction, target: &Resource, mode: DeleteMode) -> Result<()> {
        let subject = target.deleted_object().unwrap_or(target);
        match subject.kind() {
            ResourceKind::Description => {
                return Err(RepositoryError::Constraint(format!(
                    "{} is a binary description and cannot be removed on its own",
                    subject.id()
                )))
            }
            ResourceKind::TimeMap | ResourceKind::Memento => {
                return Err(RepositoryError::MethodNotAllowed(format!(
                    "{} cannot be deleted",
                    subject.id()
                )))
            }
            _ => {}
        }
        let id = target.id();
        if id.is_repository_root() {
            return Err(RepositoryError::MethodNotAllowed(
                "The repository root cannot be deleted".to_string(),
            ));
        }

        match mode {
            DeleteMode::Delete => {
                if target.is_deleted() {
                    return Err(RepositoryError::Gone(id.to_string()));
                }
            }
            DeleteMode::Purge => {
                if subject
                    .headers()
                    .map_or(false, |h| h.archival_group_id.is_some())
                {
                    return Err(RepositoryError::MethodNotAllowed(format!(
                        "{} is inside an archival group; purge the group root",
                        id
                    )));
                }
                for ancestor in id.base_id().ancestors() {
                    match self.factory.headers(Some(tx), &ancestor) {
                        Ok(h) if h.deleted => {
                            return Err(RepositoryError::MethodNotAllowed(format!(
                                "{} is inside deleted {}; purge {} first",
                                id, ancestor, ancestor
                            )))
                        }
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeleteOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteOrchestrator").finish_non_exhaustive()
    }
}

fn operation(id: ResourceId, mode: DeleteMode, principal: Option<&str>) -> ResourceOperation {
    match mode {
        DeleteMode::Delete => ResourceOperation::delete(id, principal),
        DeleteMode::Purge => ResourceOperation::purge(id, principal),
    }
}
