//! Storage layer for Archivum
//!
//! This crate implements:
//! - PersistentStorageSession / StorageBackend: the per-transaction storage contract
//! - MemoryStorage: in-memory versioned backend (head + ascending version chain per id)
//! - ContainmentIndex: temporal parent/child records with per-transaction staging
//! - EventAccumulator / EventSink: commit-time event recording
//! - TransactionParticipant: hook for state finalized alongside a storage commit
//! - Clock: wall-clock source, with a manual clock for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod containment;
pub mod events;
pub mod memory;
pub mod participant;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use containment::ContainmentIndex;
pub use events::{EventAccumulator, EventSink, NoopEventSink, RecordingEventSink, ResourceEvent};
pub use memory::{MemorySession, MemoryStorage};
pub use participant::TransactionParticipant;
pub use session::{PersistentStorageSession, StorageBackend};
