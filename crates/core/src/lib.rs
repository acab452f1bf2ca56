//! Core types for Archivum
//!
//! This crate defines the foundational types used throughout the system:
//! - ResourceId: hierarchical identifier with companion and version suffixes
//! - ResourceHeaders: persisted metadata record
//! - Graph / Triple / Term: minimal RDF model
//! - ResourceOperation: staged mutation model
//! - Timestamp: microsecond storage instant
//! - memento: label and RFC 1123 formats
//! - Error: error taxonomy and status mapping

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod headers;
pub mod id;
pub mod memento;
pub mod operation;
pub mod rdf;
pub mod timestamp;

pub use error::{ErrorKind, RepositoryError, Result};
pub use headers::{InteractionModel, ResourceHeaders};
pub use id::{Companion, ResourceId, VersionSegment, ROOT_ID};
pub use operation::{OperationBody, OperationType, ResourceOperation};
pub use rdf::{Graph, Term, Triple};
pub use timestamp::Timestamp;
