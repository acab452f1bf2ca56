//! Memento versioning
//!
//! Version creation, TimeMap rendering and datetime negotiation.
//!
//! Versions are only ever stamped by storage at commit, so version creation
//! runs in a short-lived transaction that this engine commits itself. The
//! new memento is the one stamped with that commit's instant.
//!
//! Negotiation compares memento instants truncated to the second against
//! the requested datetime:
//!
//! ```text
//! versions: t1 < t2
//!   requested < t1        -> t1   (earliest)
//!   t1 <= requested < t2  -> t1
//!   requested >= t2       -> t2
//!   no versions           -> NotAcceptable
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use archivum_concurrency::Transaction;
use archivum_core::rdf::{FEDORA_CREATED, LDP_CONTAINS};
use archivum_core::{
    memento, Graph, InteractionModel, RepositoryError, ResourceId, ResourceOperation, Result,
    Term, Timestamp, Triple,
};
use archivum_storage::EventAccumulator;

use crate::locking::ResourceLocker;
use crate::resource::{Resource, ResourceFactory, TimeMapView};
use crate::services::stage;

/// Link-format media type
pub const LINK_FORMAT: &str = "application/link-format";

/// Client-supplied parts of a version-creation request
///
/// Both fields must be absent; they exist so that a request carrying them
/// can be rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRequest {
    /// `Slug` header
    pub slug: Option<String>,
    /// `Memento-Datetime` header
    pub memento_datetime: Option<String>,
}

/// One memento of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MementoRef {
    /// `.../fcr:versions/{label}`
    pub id: ResourceId,
    /// Label
    pub label: String,
    /// Creation instant
    pub instant: Timestamp,
}

impl MementoRef {
    /// `Memento-Datetime` value
    pub fn memento_datetime(&self) -> String {
        memento::format_rfc1123(self.instant)
    }
}

/// One entry of a link-format TimeMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Target
    pub uri: String,
    /// Relation
    pub rel: String,
    /// Extra parameters, in order
    pub params: Vec<(String, String)>,
}

impl Link {
    fn new(uri: impl Into<String>, rel: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            rel: rel.into(),
            params: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// Value of parameter `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>;rel=\"{}\"", self.uri, self.rel)?;
        for (key, value) in &self.params {
            write!(f, ";{}=\"{}\"", key, value)?;
        }
        Ok(())
    }
}

/// Version creation, TimeMaps and negotiation
pub struct VersioningEngine {
    factory: Arc<ResourceFactory>,
    events: Arc<EventAccumulator>,
    locker: ResourceLocker,
    base_uri: String,
}

impl VersioningEngine {
    /// Engine rendering URIs under `base_uri`
    pub fn new(
        factory: Arc<ResourceFactory>,
        events: Arc<EventAccumulator>,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            events,
            locker: ResourceLocker::new(),
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a memento of `id` (or of the original of timemap `id`) and
    /// commit the transaction
    ///
    /// # Errors
    ///
    /// - `BadRequest` inside a long-lived transaction, or when the request
    ///   carries a slug or a Memento-Datetime
    /// - `Gone` when the resource is deleted
    /// - `MethodNotAllowed` when `id` is a memento
    pub fn create_version(
        &self,
        tx: &Transaction,
        id: &ResourceId,
        request: &VersionRequest,
        principal: Option<&str>,
    ) -> Result<MementoRef> {
        if !tx.is_short_lived() {
            return Err(RepositoryError::bad_request(
                "Version creation is not allowed within transactions.",
            ));
        }
        if request.slug.is_some() {
            return Err(RepositoryError::bad_request(
                "Slugs are not allowed when creating versions",
            ));
        }
        if request.memento_datetime.is_some() {
            return Err(RepositoryError::bad_request(
                "Versions cannot be created with a Memento-Datetime",
            ));
        }
        if id.is_memento() || id.is_tombstone() {
            return Err(RepositoryError::MethodNotAllowed(format!(
                "Cannot create a version of {}",
                id
            )));
        }

        let original = id.original();
        let headers = self.factory.headers(Some(tx), &original)?;
        if headers.deleted {
            return Err(RepositoryError::Gone(original.to_string()));
        }
        self.locker.lock_for_update(tx, &original, &headers)?;
        if headers.interaction_model == InteractionModel::NonRdfSource {
            tx.lock_resource(&original.as_description())?;
        }

        stage(
            tx,
            &self.events,
            ResourceOperation::create_version(original.clone(), principal),
        )?;
        let instant = tx.commit_if_short_lived()?.ok_or_else(|| {
            RepositoryError::storage(format!("Version of {} was not committed", original))
        })?;

        let versions = self.factory.read(None, |s| s.list_versions(&original))?;
        let created = at_instant(&original, &versions, instant).ok_or_else(|| {
            RepositoryError::storage(format!("No version of {} recorded at {}", original, instant))
        })?;
        info!(
            target: "archivum::version",
            resource = %original,
            label = %created.label,
            "Created version"
        );
        Ok(created)
    }

    /// TimeMap of `id`'s original
    pub fn timemap(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<TimeMapView> {
        match self.factory.get_resource(tx, &id.as_timemap())? {
            Resource::TimeMap(view) => Ok(view),
            other => Err(RepositoryError::storage(format!(
                "{} did not resolve to a timemap",
                other.id()
            ))),
        }
    }

    /// Mementos of `id`'s original, ascending
    pub fn mementos(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Vec<MementoRef>> {
        let view = self.timemap(tx, id)?;
        Ok(refs(&view.original, &view.versions))
    }

    /// Link-format entries: original, timegate, mementos, self
    ///
    /// `self` carries `from` and `until` only with two or more mementos.
    pub fn timemap_links(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Vec<Link>> {
        let view = self.timemap(tx, id)?;
        let original_uri = view.original.to_uri(&self.base_uri);

        let mut links = vec![
            Link::new(original_uri.clone(), "original"),
            Link::new(original_uri, "timegate"),
        ];
        for m in refs(&view.original, &view.versions) {
            links.push(
                Link::new(m.id.to_uri(&self.base_uri), "memento")
                    .param("datetime", m.memento_datetime()),
            );
        }

        let mut this = Link::new(view.id.to_uri(&self.base_uri), "self").param("type", LINK_FORMAT);
        if let (Some(first), Some(last)) = (view.versions.first(), view.versions.last()) {
            if view.versions.len() >= 2 {
                this = this
                    .param("from", memento::format_rfc1123(*first))
                    .param("until", memento::format_rfc1123(*last));
            }
        }
        links.push(this);
        Ok(links)
    }

    /// Link-format body
    pub fn timemap_link_format(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<String> {
        let links = self.timemap_links(tx, id)?;
        Ok(links
            .iter()
            .map(Link::to_string)
            .collect::<Vec<_>>()
            .join(",\n"))
    }

    /// RDF TimeMap: `ldp:contains` per memento plus its creation date
    pub fn timemap_graph(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Graph> {
        let view = self.timemap(tx, id)?;
        let subject = view.id.full_id();
        let mut graph = Graph::new();
        for m in refs(&view.original, &view.versions) {
            let memento_id = m.id.full_id();
            graph.insert(Triple::new(
                subject.clone(),
                LDP_CONTAINS,
                Term::uri(memento_id.clone()),
            ));
            graph.insert(Triple::new(
                memento_id,
                FEDORA_CREATED,
                Term::literal(m.instant.to_datetime().to_rfc3339()),
            ));
        }
        Ok(graph)
    }

    /// Resolve `Accept-Datetime` on an original resource to a memento
    ///
    /// A malformed datetime is rejected before anything is looked up.
    pub fn negotiate(
        &self,
        tx: Option<&Transaction>,
        id: &ResourceId,
        accept_datetime: &str,
    ) -> Result<MementoRef> {
        let requested = memento::parse_rfc1123(accept_datetime)?;
        if id.is_timemap() || id.is_memento() {
            return Err(RepositoryError::bad_request(format!(
                "Datetime negotiation applies to original resources, not {}",
                id
            )));
        }
        let original = id.original();
        let versions = self.factory.read(tx, |s| s.list_versions(&original))?;
        if versions.is_empty() {
            return Err(RepositoryError::NotAcceptable(format!(
                "{} has no mementos",
                original
            )));
        }

        let index = versions
            .iter()
            .rposition(|v| !v.truncate_to_secs().is_after(requested))
            .unwrap_or(0);
        let labels = memento::labels_for(&versions);
        let chosen = MementoRef {
            id: original.as_memento(labels[index].clone()),
            label: labels[index].clone(),
            instant: versions[index],
        };
        debug!(
            target: "archivum::version",
            resource = %original,
            requested = %accept_datetime,
            label = %chosen.label,
            "Negotiated memento"
        );
        Ok(chosen)
    }

    /// Resolve a memento id
    pub fn get_memento(&self, tx: Option<&Transaction>, id: &ResourceId) -> Result<Resource> {
        if !id.is_memento() {
            return Err(RepositoryError::bad_request(format!("{} is not a memento", id)));
        }
        self.factory.get_resource(tx, id)
    }
}

impl fmt::Debug for VersioningEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersioningEngine")
            .field("base_uri", &self.base_uri)
            .finish_non_exhaustive()
    }
}

fn refs(original: &ResourceId, versions: &[Timestamp]) -> Vec<MementoRef> {
    memento::labels_for(versions)
        .into_iter()
        .zip(versions.iter())
        .map(|(label, instant)| MementoRef {
            id: original.as_memento(label.clone()),
            label,
            instant: *instant,
        })
        .collect()
}

fn at_instant(
    original: &ResourceId,
    versions: &[Timestamp],
    instant: Timestamp,
) -> Option<MementoRef> {
    refs(original, versions)
        .into_iter()
        .find(|m| m.instant == instant)
}
