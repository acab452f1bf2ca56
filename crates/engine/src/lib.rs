//! Repository engine for Archivum
//!
//! This crate builds the repository semantics on top of the storage and
//! concurrency layers:
//! - RepositoryConfig: `archivum.toml` configuration
//! - ResourceLocker: the locking policy for every mutation path
//! - Resource / ResourceFactory: tagged union over resource kinds
//! - ResourceServices: create and update paths
//! - VersioningEngine: version creation, TimeMaps, datetime negotiation
//! - DeleteOrchestrator: depth-first delete and purge
//! - AclCache: shared effective-ACL cache
//! - TransactionProvider / http: the request boundary contract
//! - Repository: facade wiring it all together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acl_cache;
pub mod config;
pub mod delete;
pub mod http;
pub mod locking;
pub mod provider;
pub mod repository;
pub mod resource;
pub mod services;
pub mod versioning;

#[cfg(test)]
mod test_support;

pub use acl_cache::{AclCache, AclHandle};
pub use config::{RepositoryConfig, CONFIG_FILE_NAME};
pub use delete::{DeleteMode, DeleteOrchestrator};
pub use http::{
    allow_header, allowed_methods, check_method, Method, ResponseHead, TransactionEndpoints,
};
pub use locking::ResourceLocker;
pub use provider::{RequestContext, TransactionProvider, ATOMIC_EXPIRES_HEADER, ATOMIC_ID_HEADER};
pub use repository::Repository;
pub use resource::{
    MementoView, Resource, ResourceFactory, ResourceKind, ResourceView, TimeMapView,
};
pub use services::{BinaryContent, ResourceServices};
pub use versioning::{Link, MementoRef, VersionRequest, VersioningEngine, LINK_FORMAT};
