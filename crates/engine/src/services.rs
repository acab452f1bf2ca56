//! Mutation services
//!
//! Create and update paths for containers, binaries and ACLs. Each service
//! validates first, then takes its locks, then stages the operation with
//! the storage session, the event accumulator and the containment index.

use std::sync::Arc;

use tracing::debug;

use archivum_concurrency::Transaction;
use archivum_core::{
    Companion, Graph, InteractionModel, RepositoryError, ResourceHeaders, ResourceId,
    ResourceOperation, Result, VersionSegment,
};
use archivum_storage::{ContainmentIndex, EventAccumulator};

use crate::acl_cache::AclCache;
use crate::locking::ResourceLocker;
use crate::resource::ResourceFactory;

/// Content of a new or replaced binary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryContent {
    /// Bytes
    pub content: Vec<u8>,
    /// Mime type
    pub mime_type: Option<String>,
    /// Filename
    pub filename: Option<String>,
}

impl BinaryContent {
    /// Content with a mime type
    pub fn new(content: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mime_type: Some(mime_type.into()),
            filename: None,
        }
    }

    /// Set the filename
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Stage one operation and its event
pub(crate) fn stage(
    tx: &Transaction,
    events: &EventAccumulator,
    operation: ResourceOperation,
) -> Result<()> {
    debug!(
        target: "archivum::storage",
        tx = %tx.id(),
        resource = %operation.resource_id,
        operation = %operation.operation_type(),
        "Staging operation"
    );
    tx.persist(operation.clone())?;
    events.record(tx.id(), &operation);
    Ok(())
}

/// Create and update operations
pub struct ResourceServices {
    factory: Arc<ResourceFactory>,
    containment: Arc<ContainmentIndex>,
    events: Arc<EventAccumulator>,
    acl_cache: Arc<AclCache>,
    locker: ResourceLocker,
}

impl ResourceServices {
    /// Services over shared repository components
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

    /// Create a basic container, optionally as an Archival Group root
    pub fn create_container(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        triples: Graph,
        archival_group: bool,
        principal: Option<&str>,
    ) -> Result<ResourceId> {
        let (parent, parent_headers) = self.prepare_create(tx, id)?;
        if archival_group && parent_headers.in_archival_group() {
            return Err(RepositoryError::Constraint(format!(
                "Archival group {} cannot be nested inside another archival group",
                id
            )));
        }
        self.locker.lock_for_child_add(tx, &parent, &parent_headers)?;
        tx.lock_resource(id)?;

        let op = ResourceOperation::create_container(
            id.clone(),
            parent.clone(),
            triples,
            archival_group,
            principal,
        );
        stage(tx, &self.events, op)?;
        self.containment.add_containment(tx.id(), &parent, id);
        Ok(id.clone())
    }

    /// Create a binary; its description is created with it
    pub fn create_binary(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        binary: BinaryContent,
        principal: Option<&str>,
    ) -> Result<ResourceId> {
        let (parent, parent_headers) = self.prepare_create(tx, id)?;
        self.locker.lock_for_child_add(tx, &parent, &parent_headers)?;
        tx.lock_resource(id)?;
        tx.lock_resource(&id.as_description())?;

        let op = ResourceOperation::create_binary(
            id.clone(),
            parent.clone(),
            binary.content,
            binary.mime_type,
            binary.filename,
            principal,
        );
        stage(tx, &self.events, op)?;
        self.containment.add_containment(tx.id(), &parent, id);
        Ok(id.clone())
    }

    /// Create the ACL of `base`
    pub fn create_acl(
        &self,
        tx: &Transaction,
        base: &ResourceId,
        triples: Graph,
        principal: Option<&str>,
    ) -> Result<ResourceId> {
        let base = base.base_id();
        let base_headers = self.factory.headers(Some(tx), &base)?;
        if base_headers.deleted {
            return Err(RepositoryError::Gone(base.to_string()));
        }
        let acl_id = base.as_acl();
        self.ensure_absent(tx, &acl_id)?;
        self.locker.lock_for_update(tx, &acl_id, &base_headers)?;

        stage(tx, &self.events, ResourceOperation::create_acl(&base, triples, principal))?;
        self.acl_cache.mark_changed(tx.id());
        Ok(acl_id)
    }

    /// Replace the triples of a container, description or ACL
    pub fn replace_properties(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        triples: Graph,
        principal: Option<&str>,
    ) -> Result<()> {
        let headers = self.live_head(tx, id)?;
        if !headers.interaction_model.is_rdf() {
            return Err(RepositoryError::bad_request(format!(
                "{} is a binary; replace the properties of {}",
                id,
                id.as_description()
            )));
        }
        self.locker.lock_for_update(tx, id, &headers)?;
        stage(
            tx,
            &self.events,
            ResourceOperation::replace_properties(id.clone(), triples, principal),
        )?;
        if headers.interaction_model == InteractionModel::Acl {
            self.acl_cache.mark_changed(tx.id());
        }
        Ok(())
    }

    /// Replace the content of a binary
    pub fn replace_binary(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        binary: BinaryContent,
        principal: Option<&str>,
    ) -> Result<()> {
        let headers = self.live_head(tx, id)?;
        if headers.interaction_model != InteractionModel::NonRdfSource {
            return Err(RepositoryError::bad_request(format!("{} is not a binary", id)));
        }
        self.locker.lock_for_update(tx, id, &headers)?;
        stage(
            tx,
            &self.events,
            ResourceOperation::replace_binary(
                id.clone(),
                binary.content,
                binary.mime_type,
                binary.filename,
                principal,
            ),
        )
    }

    /// Validate a create and return the nearest existing ancestor
    fn prepare_create(
        &self,
        tx: &Transaction,
        id: &ResourceId,
    ) -> Result<(ResourceId, ResourceHeaders)> {
        if id.companion() != Companion::None
            || !matches!(id.version_segment(), VersionSegment::None)
        {
            return Err(RepositoryError::bad_request(format!(
                "Cannot create {} directly",
                id
            )));
        }
        if id.is_repository_root() {
            return Err(RepositoryError::Conflict(format!("{} already exists", id)));
        }
        self.ensure_absent(tx, id)?;

        let (parent, parent_headers) = self.factory.nearest_existing_ancestor(Some(tx), id)?;
        if parent_headers.deleted {
            return Err(RepositoryError::bad_request(format!(
                "Cannot create {} inside deleted resource {}",
                id, parent
            )));
        }
        if parent_headers.interaction_model != InteractionModel::BasicContainer {
            return Err(RepositoryError::bad_request(format!(
                "{} cannot contain children",
                parent
            )));
        }
        Ok((parent, parent_headers))
    }

    fn ensure_absent(&self, tx: &Transaction, id: &ResourceId) -> Result<()> {
        match self.factory.headers(Some(tx), id) {
            Ok(existing) if existing.deleted => Err(RepositoryError::Gone(id.to_string())),
            Ok(_) => Err(RepositoryError::Conflict(format!("{} already exists", id))),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn live_head(&self, tx: &Transaction, id: &ResourceId) -> Result<ResourceHeaders> {
        if !matches!(id.version_segment(), VersionSegment::None) {
            return Err(RepositoryError::MethodNotAllowed(format!(
                "{} cannot be modified",
                id
            )));
        }
        let headers = self.factory.headers(Some(tx), id)?;
        if headers.deleted {
            return Err(RepositoryError::Gone(id.to_string()));
        }
        Ok(headers)
    }
}

impl std::fmt::Debug for ResourceServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceServices").finish_non_exhaustive()
    }
}
