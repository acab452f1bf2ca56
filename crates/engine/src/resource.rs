//! Resolved resources
//!
//! [`Resource`] is a tagged union over everything an identifier can resolve
//! to. Callers dispatch on the tag or on the capability queries
//! (`has_content`, `has_children`, `is_deleted`, `is_acl`).
//!
//! | id shape                      | resolves to                                   |
//! |-------------------------------|-----------------------------------------------|
//! | `a`, live                     | Container / Binary                            |
//! | `a`, deleted                  | Tombstone wrapping the deleted object         |
//! | `a/fcr:metadata`              | Description                                   |
//! | `a/fcr:acl`                   | Acl                                           |
//! | `a/fcr:tombstone`             | Tombstone, or not found if `a` is live        |
//! | `a/fcr:versions`              | TimeMap (also for deleted originals)          |
//! | `a/fcr:versions/{label}`      | Memento                                       |

use std::sync::Arc;

use archivum_concurrency::Transaction;
use archivum_core::rdf::LDP_CONTAINS;
use archivum_core::{
    memento, Graph, InteractionModel, RepositoryError, ResourceHeaders, ResourceId, Result, Term,
    Timestamp, Triple, VersionSegment,
};
use archivum_storage::{ContainmentIndex, PersistentStorageSession, StorageBackend};

/// Resource tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Basic container
    Container,
    /// Binary (non-RDF source)
    Binary,
    /// RDF description of a binary
    Description,
    /// ACL companion
    Acl,
    /// Deleted resource
    Tombstone,
    /// Version listing
    TimeMap,
    /// Immutable version
    Memento,
}

/// Head state of a stored resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceView {
    /// Identifier
    pub id: ResourceId,
    /// Current headers
    pub headers: ResourceHeaders,
}

/// Version listing of an original resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeMapView {
    /// `.../fcr:versions` id
    pub id: ResourceId,
    /// The versioned resource
    pub original: ResourceId,
    /// Whether the original is tombstoned
    pub original_deleted: bool,
    /// Memento instants, ascending
    pub versions: Vec<Timestamp>,
}

/// One memento
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MementoView {
    /// `.../fcr:versions/{label}` id
    pub id: ResourceId,
    /// The versioned resource
    pub original: ResourceId,
    /// Creation instant
    pub instant: Timestamp,
    /// Headers as captured
    pub headers: ResourceHeaders,
}

/// Anything an identifier resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Basic container
    Container(ResourceView),
    /// Binary
    Binary(ResourceView),
    /// Binary description
    Description(ResourceView),
    /// ACL companion
    Acl(ResourceView),
    /// Deleted object, kept until purge
    Tombstone(Box<Resource>),
    /// Version listing
    TimeMap(TimeMapView),
    /// Immutable version
    Memento(MementoView),
}

impl Resource {
    /// Tag
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Container(_) => ResourceKind::Container,
            Resource::Binary(_) => ResourceKind::Binary,
            Resource::Description(_) => ResourceKind::Description,
            Resource::Acl(_) => ResourceKind::Acl,
            Resource::Tombstone(_) => ResourceKind::Tombstone,
            Resource::TimeMap(_) => ResourceKind::TimeMap,
            Resource::Memento(_) => ResourceKind::Memento,
        }
    }

    /// Identifier; a tombstone reports the id of the deleted object
    pub fn id(&self) -> &ResourceId {
        match self {
            Resource::Container(v)
            | Resource::Binary(v)
            | Resource::Description(v)
            | Resource::Acl(v) => &v.id,
            Resource::Tombstone(inner) => inner.id(),
            Resource::TimeMap(t) => &t.id,
            Resource::Memento(m) => &m.id,
        }
    }

    /// Headers, if the resource is stored (timemaps are derived)
    pub fn headers(&self) -> Option<&ResourceHeaders> {
        match self {
            Resource::Container(v)
            | Resource::Binary(v)
            | Resource::Description(v)
            | Resource::Acl(v) => Some(&v.headers),
            Resource::Tombstone(inner) => inner.headers(),
            Resource::TimeMap(_) => None,
            Resource::Memento(m) => Some(&m.headers),
        }
    }

    fn model(&self) -> Option<InteractionModel> {
        self.headers().map(|h| h.interaction_model)
    }

    /// Whether the resource carries binary content
    pub fn has_content(&self) -> bool {
        match self {
            Resource::Binary(_) => true,
            Resource::Memento(_) => self.model() == Some(InteractionModel::NonRdfSource),
            _ => false,
        }
    }

    /// Whether the resource can contain children
    pub fn has_children(&self) -> bool {
        match self {
            Resource::Container(_) => true,
            Resource::Memento(_) => self.model() == Some(InteractionModel::BasicContainer),
            _ => false,
        }
    }

    /// Whether this is a tombstone
    pub fn is_deleted(&self) -> bool {
        matches!(self, Resource::Tombstone(_))
    }

    /// Whether this is an ACL or a memento of one
    pub fn is_acl(&self) -> bool {
        match self {
            Resource::Acl(_) => true,
            Resource::Memento(m) => m.original.is_acl(),
            _ => false,
        }
    }

    /// The deleted object behind a tombstone
    pub fn deleted_object(&self) -> Option<&Resource> {
        match self {
            Resource::Tombstone(inner) => Some(inner),
            _ => None,
        }
    }

    /// Fail with [`RepositoryError::Gone`] on a tombstone
    pub fn require_live(self) -> Result<Resource> {
        match self {
            Resource::Tombstone(inner) => Err(RepositoryError::Gone(inner.id().to_string())),
            other => Ok(other),
        }
    }
}

/// Resolves identifiers to [`Resource`]s through a transaction or a
/// read-only session
pub struct ResourceFactory {
    backend: Arc<dyn StorageBackend>,
    containment: Arc<ContainmentIndex>,
}

impl ResourceFactory {
    /// Factory reading from `backend`
    pub fn new(backend: Arc<dyn StorageBackend>, containment: Arc<ContainmentIndex>) -> Self {
        Self {
            backend,
            containment,
        }
    }

    /// Containment index used for `contains` triples
    pub fn containment(&self) -> &Arc<ContainmentIndex> {
        &self.containment
    }

    /// Run `f` against the transaction's session, or a read-only one
    pub fn read<T>(
        &self,
        tx: Option<&Transaction>,
        f: impl FnOnce(&dyn PersistentStorageSession) -> Result<T>,
    ) -> Result<T> {
        match tx {
            Some(tx) => tx.with_session(f),
            None => {
                let session = self.backend.read_only_session();
                f(&*session)
            }
        }
    }

    /// Head headers of `id`
    pub fn headers(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<ResourceHeaders> {
        self.read(tx, |s| s.get_headers(id, None))
    }

    /// Resolve `id`
    pub fn get_resource(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Resource> {
        match id.version_segment() {
            VersionSegment::None => self.head(tx, id),
            VersionSegment::Tombstone => match self.head(tx, &id.base_id())? {
                tombstone @ Resource::Tombstone(_) => Ok(tombstone),
                _ => Err(RepositoryError::not_found(id)),
            },
            VersionSegment::TimeMap => {
                let original = id.original();
                let (headers, versions) = self.read(tx, |s| {
                    Ok((s.get_headers(&original, None)?, s.list_versions(&original)?))
                })?;
                Ok(Resource::TimeMap(TimeMapView {
                    id: id.clone(),
                    original,
                    original_deleted: headers.deleted,
                    versions,
                }))
            }
            VersionSegment::Memento(label) => {
                memento::validate_label(label)?;
                let original = id.original();
                let versions = self.read(tx, |s| s.list_versions(&original))?;
                let instant = memento::find_by_label(&versions, label)
                    .ok_or_else(|| RepositoryError::NotFound(format!("No memento {}", id)))?;
                let headers = self.read(tx, |s| s.get_headers(&original, Some(instant)))?;
                Ok(Resource::Memento(MementoView {
                    id: id.clone(),
                    original,
                    instant,
                    headers,
                }))
            }
        }
    }

    fn head(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Resource> {
        let headers = self.headers(tx, id)?;
        let deleted = headers.deleted;
        let view = ResourceView {
            id: id.clone(),
            headers,
        };
        let resource = match view.headers.interaction_model {
            InteractionModel::BasicContainer => Resource::Container(view),
            InteractionModel::NonRdfSource => Resource::Binary(view),
            InteractionModel::NonRdfSourceDescription => Resource::Description(view),
            InteractionModel::Acl => Resource::Acl(view),
        };
        if deleted {
            Ok(Resource::Tombstone(Box::new(resource)))
        } else {
            Ok(resource)
        }
    }

    /// ACL companion of `id`'s base resource; tombstoned ACLs only when
    /// `include_deleted`
    pub fn acl_of(
        &self,
        tx: Option<&Transaction>,
        id: &ResourceId,
        include_deleted: bool,
    ) -> Result<Option<Resource>> {
        match self.head(tx, &id.as_acl()) {
            Ok(Resource::Tombstone(_)) if !include_deleted => Ok(None),
            Ok(acl) => Ok(Some(acl)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Closest ancestor of `id` that has a stored record (live or deleted)
    ///
    /// The repository root always exists, so this only fails on storage
    /// errors.
    pub fn nearest_existing_ancestor(
        &self,
        tx: Option<&Transaction>,
        id: &ResourceId,
    ) -> Result<(ResourceId, ResourceHeaders)> {
        for ancestor in id.base_id().ancestors() {
            match self.headers(tx, &ancestor) {
                Ok(headers) => return Ok((ancestor, headers)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(RepositoryError::not_found(ResourceId::root()))
    }

    /// RDF graph of a resource, with `ldp:contains` for its children
    ///
    /// A memento lists the children as of its creation instant; a binary is
    /// described by its description.
    pub fn describe(&self, tx: Option<&Transaction>, resource: &Resource) -> Result<Graph> {
        match resource {
            Resource::Container(view) => {
                let mut graph = self.read(tx, |s| s.get_triples(&view.id, None))?;
                let children = self.containment.contains(tx.map(|t| t.id()), &view.id);
                add_contains(&mut graph, &view.id, &children);
                Ok(graph)
            }
            Resource::Description(view) | Resource::Acl(view) => {
                self.read(tx, |s| s.get_triples(&view.id, None))
            }
            Resource::Binary(view) => {
                let description = view.id.as_description();
                self.read(tx, |s| s.get_triples(&description, None))
            }
            Resource::Memento(m) => {
                if resource.has_content() {
                    return Err(RepositoryError::bad_request(format!(
                        "{} is a binary memento; describe its description memento",
                        m.id
                    )));
                }
                let mut graph = self.read(tx, |s| s.get_triples(&m.original, Some(m.instant)))?;
                if resource.has_children() {
                    let children = self.containment.contains_at(&m.original, m.instant);
                    add_contains(&mut graph, &m.original, &children);
                }
                Ok(graph)
            }
            Resource::Tombstone(inner) => Err(RepositoryError::Gone(inner.id().to_string())),
            Resource::TimeMap(t) => Err(RepositoryError::bad_request(format!(
                "{} is a timemap; it has no stored triples",
                t.id
            ))),
        }
    }

    /// Binary content of a binary or binary memento, optionally an inclusive
    /// byte range
    pub fn content(
        &self,
        tx: Option<&Transaction>,
        resource: &Resource,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>> {
        let (id, version) = match resource {
            Resource::Binary(view) => (&view.id, None),
            Resource::Memento(m) if resource.has_content() => (&m.original, Some(m.instant)),
            Resource::Tombstone(inner) => return Err(RepositoryError::Gone(inner.id().to_string())),
            other => {
                return Err(RepositoryError::bad_request(format!(
                    "{} has no binary content",
                    other.id()
                )))
            }
        };
        self.read(tx, |s| match range {
            Some((start, end)) => s.get_binary_range(id, version, start, end),
            None => s.get_binary_content(id, version),
        })
    }
}

impl std::fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFactory").finish_non_exhaustive()
    }
}

/// Add one `ldp:contains` triple per child
pub(crate) fn add_contains(graph: &mut Graph, parent: &ResourceId, children: &[ResourceId]) {
    for child in children {
        graph.insert(Triple::new(
            parent.full_id(),
            LDP_CONTAINS,
            Term::uri(child.full_id()),
        ));
    }
}
