//! Persisted resource metadata

use serde::{Deserialize, Serialize};

use crate::id::ResourceId;
use crate::timestamp::Timestamp;

/// LDP interaction model of a stored resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionModel {
    /// `ldp:BasicContainer`
    BasicContainer,
    /// `ldp:NonRDFSource`, a binary
    NonRdfSource,
    /// `fedora:NonRdfSourceDescription`, the RDF description of a binary
    NonRdfSourceDescription,
    /// `webac:Acl`
    Acl,
}

impl InteractionModel {
    /// Type URI
    pub const fn uri(&self) -> &'static str {
        match self {
            InteractionModel::BasicContainer => "http://www.w3.org/ns/ldp#BasicContainer",
            InteractionModel::NonRdfSource => "http://www.w3.org/ns/ldp#NonRDFSource",
            InteractionModel::NonRdfSourceDescription => {
                "http://fedora.info/definitions/v4/repository#NonRdfSourceDescription"
            }
            InteractionModel::Acl => "http://fedora.info/definitions/v4/webac#Acl",
        }
    }

    /// Whether resources of this model carry RDF triples
    pub const fn is_rdf(&self) -> bool {
        !matches!(self, InteractionModel::NonRdfSource)
    }
}

/// Metadata record stored alongside every resource and memento
///
/// Mementos carry a copy of the headers as of their creation with
/// `memento_created_date` set; those copies are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHeaders {
    /// Identifier of the resource
    pub id: ResourceId,
    /// Containing resource, `None` only for the repository root
    pub parent: Option<ResourceId>,
    /// Root of the Archival Group this resource belongs to
    pub archival_group_id: Option<ResourceId>,
    /// Opaque token that changes on every modification
    pub state_token: String,
    /// Interaction model
    pub interaction_model: InteractionModel,
    /// Binary mime type
    pub mime_type: Option<String>,
    /// Binary filename
    pub filename: Option<String>,
    /// Binary size in bytes
    pub content_size: Option<u64>,
    /// Binary digests, e.g. `urn:sha1:...`
    pub digests: Vec<String>,
    /// External content location
    pub external_url: Option<String>,
    /// External content handling (`proxy`, `redirect`, `copy`)
    pub external_handling: Option<String>,
    /// Creating principal
    pub created_by: Option<String>,
    /// Creation instant
    pub created_date: Timestamp,
    /// Last modifying principal
    pub last_modified_by: Option<String>,
    /// Last modification instant
    pub last_modified_date: Timestamp,
    /// Set on mementos only
    pub memento_created_date: Option<Timestamp>,
    /// Whether this resource is an Archival Group root
    pub archival_group: bool,
    /// Whether this resource is the root of a storage object
    pub object_root: bool,
    /// Whether the resource has been deleted (tombstoned)
    pub deleted: bool,
}

impl ResourceHeaders {
    /// Fresh headers for a resource created at `now`
    pub fn new(
        id: ResourceId,
        parent: Option<ResourceId>,
        interaction_model: InteractionModel,
        principal: Option<&str>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            parent,
            archival_group_id: None,
            state_token: state_token_for(now),
            interaction_model,
            mime_type: None,
            filename: None,
            content_size: None,
            digests: Vec::new(),
            external_url: None,
            external_handling: None,
            created_by: principal.map(str::to_string),
            created_date: now,
            last_modified_by: principal.map(str::to_string),
            last_modified_date: now,
            memento_created_date: None,
            archival_group: false,
            object_root: false,
            deleted: false,
        }
    }

    /// Record a modification
    pub fn touch(&mut self, principal: Option<&str>, now: Timestamp) {
        self.last_modified_by = principal.map(str::to_string);
        self.last_modified_date = now;
        self.state_token = state_token_for(now);
    }

    /// Whether this resource belongs to, or is, an Archival Group
    pub fn in_archival_group(&self) -> bool {
        self.archival_group || self.archival_group_id.is_some()
    }

    /// Copy of these headers as a memento created at `instant`
    pub fn as_memento(&self, instant: Timestamp) -> Self {
        Self {
            memento_created_date: Some(instant),
            ..self.clone()
        }
    }
}

fn state_token_for(ts: Timestamp) -> String {
    format!("{:016X}", ts.as_micros())
}
