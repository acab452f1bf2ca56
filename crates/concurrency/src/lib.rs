//! Concurrency layer for Archivum
//!
//! This crate implements:
//! - LockTable: per-resource EXCLUSIVE/SHARED locks shared by all transactions
//! - Transaction: OPEN/COMMITTED/ROLLED_BACK/EXPIRED lifecycle over one storage session
//! - TransactionManager: registry with closed-id retention and expiry
//! - TransactionSweeper: background thread driving expiry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod manager;
pub mod sweeper;
pub mod transaction;

pub use archivum_storage::TransactionParticipant;
pub use lock::{LockMode, LockTable};
pub use manager::{
    ManagerStats, TransactionManager, DEFAULT_CLOSED_RETENTION, DEFAULT_SESSION_TIMEOUT,
};
pub use sweeper::TransactionSweeper;
pub use transaction::{Transaction, TransactionState};
