//! Resource mutation model
//!
//! A [`ResourceOperation`] is what gets staged into a storage session with
//! `persist`. Operations take effect in the order staged, at commit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::headers::InteractionModel;
use crate::id::ResourceId;
use crate::rdf::Graph;

/// Coarse operation type, used for event recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// New resource
    Create,
    /// Properties or content replaced
    Update,
    /// Resource tombstoned
    Delete,
    /// Resource and its history erased
    Purge,
    /// Memento created
    CreateVersion,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Purge => "purge",
            OperationType::CreateVersion => "create_version",
        };
        f.write_str(s)
    }
}

/// Payload of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationBody {
    /// Create an RDF source (container or ACL)
    CreateRdf {
        /// Containing resource
        parent: ResourceId,
        /// Interaction model of the new resource
        interaction_model: InteractionModel,
        /// User triples
        triples: Graph,
        /// Mark the new container as an Archival Group root
        archival_group: bool,
    },
    /// Create a binary; its description is created with it
    CreateBinary {
        /// Containing resource
        parent: ResourceId,
        /// Content bytes
        content: Vec<u8>,
        /// Mime type
        mime_type: Option<String>,
        /// Filename
        filename: Option<String>,
        /// Client supplied digests
        digests: Vec<String>,
    },
    /// Replace the user triples of an RDF source
    ReplaceProperties {
        /// New triples
        triples: Graph,
    },
    /// Replace binary content
    ReplaceBinary {
        /// Content bytes
        content: Vec<u8>,
        /// Mime type
        mime_type: Option<String>,
        /// Filename
        filename: Option<String>,
    },
    /// Snapshot the head as a memento at commit
    CreateVersion,
    /// Tombstone the resource
    Delete,
    /// Erase the resource and its history
    Purge,
}

/// One staged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOperation {
    /// Target
    pub resource_id: ResourceId,
    /// Acting principal
    pub user_principal: Option<String>,
    /// What to do
    pub body: OperationBody,
}

impl ResourceOperation {
    fn new(resource_id: ResourceId, user_principal: Option<&str>, body: OperationBody) -> Self {
        Self {
            resource_id,
            user_principal: user_principal.map(str::to_string),
            body,
        }
    }

    /// Create a basic container
    pub fn create_container(
        id: ResourceId,
        parent: ResourceId,
        triples: Graph,
        archival_group: bool,
        principal: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            principal,
            OperationBody::CreateRdf {
                parent,
                interaction_model: InteractionModel::BasicContainer,
                triples,
                archival_group,
            },
        )
    }

    /// Create the ACL companion of `base`
    pub fn create_acl(base: &ResourceId, triples: Graph, principal: Option<&str>) -> Self {
        Self::new(
            base.as_acl(),
            principal,
            OperationBody::CreateRdf {
                parent: base.base_id(),
                interaction_model: InteractionModel::Acl,
                triples,
                archival_group: false,
            },
        )
    }

    /// Create a binary
    pub fn create_binary(
        id: ResourceId,
        parent: ResourceId,
        content: Vec<u8>,
        mime_type: Option<String>,
        filename: Option<String>,
        principal: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            principal,
            OperationBody::CreateBinary {
                parent,
                content,
                mime_type,
                filename,
                digests: Vec::new(),
            },
        )
    }

    /// Replace triples
    pub fn replace_properties(id: ResourceId, triples: Graph, principal: Option<&str>) -> Self {
        Self::new(id, principal, OperationBody::ReplaceProperties { triples })
    }

    /// Replace binary content
    pub fn replace_binary(
        id: ResourceId,
        content: Vec<u8>,
        mime_type: Option<String>,
        filename: Option<String>,
        principal: Option<&str>,
    ) -> Self {
        Self::new(
            id,
            principal,
            OperationBody::ReplaceBinary {
                content,
                mime_type,
                filename,
            },
        )
    }

    /// Create a memento
    pub fn create_version(id: ResourceId, principal: Option<&str>) -> Self {
        Self::new(id, principal, OperationBody::CreateVersion)
    }

    /// Tombstone
    pub fn delete(id: ResourceId, principal: Option<&str>) -> Self {
        Self::new(id, principal, OperationBody::Delete)
    }

    /// Erase
    pub fn purge(id: ResourceId, principal: Option<&str>) -> Self {
        Self::new(id, principal, OperationBody::Purge)
    }

    /// Coarse type
    pub fn operation_type(&self) -> OperationType {
        match &self.body {
            OperationBody::CreateRdf { .. } | OperationBody::CreateBinary { .. } => {
                OperationType::Create
            }
            OperationBody::ReplaceProperties { .. } | OperationBody::ReplaceBinary { .. } => {
                OperationType::Update
            }
            OperationBody::CreateVersion => OperationType::CreateVersion,
            OperationBody::Delete => OperationType::Delete,
            OperationBody::Purge => OperationType::Purge,
        }
    }
}
