//! Error types for the repository engine
//!
//! Every fallible operation in the workspace returns [`RepositoryError`].
//! Variants are grouped by [`ErrorKind`], which is the only thing the HTTP
//! boundary looks at when choosing a status code.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Coarse classification of a [`RepositoryError`]
///
/// Not found vs closed vs conflict vs invalid are distinct conditions and are
/// never folded into one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resource, memento or transaction does not exist
    NotFound,
    /// Transaction exists but is committed, rolled back or expired
    Closed,
    /// Resource has been deleted and is represented by a tombstone
    Gone,
    /// Lock contention or a rejected commit
    Conflict,
    /// Malformed input, rejected before any mutation is staged
    Invalid,
    /// Datetime negotiation has no candidate
    NotAcceptable,
    /// The target does not support the requested method
    NotAllowed,
    /// Storage backend or other internal failure
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind
    pub const fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Closed => 410,
            ErrorKind::Gone => 410,
            ErrorKind::Conflict => 409,
            ErrorKind::Invalid => 400,
            ErrorKind::NotAcceptable => 406,
            ErrorKind::NotAllowed => 405,
            ErrorKind::Internal => 500,
        }
    }
}

/// Error types for the repository
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Resource or memento not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No transaction is registered under this id
    #[error("No transaction found with id {0}")]
    TransactionNotFound(String),

    /// Transaction already committed, rolled back or expired
    #[error("Transaction {id} is closed: {state}")]
    TransactionClosed {
        /// Transaction id
        id: String,
        /// Terminal state name
        state: String,
    },

    /// Resource was deleted and only its tombstone remains
    #[error("Resource {0} has been deleted")]
    Gone(String),

    /// Another transaction holds a conflicting lock
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage rejected prepare or commit; the transaction was rolled back
    #[error("Commit failed for transaction {id}: {reason}")]
    CommitFailed {
        /// Transaction id
        id: String,
        /// Backend message
        reason: String,
    },

    /// Malformed or disallowed request input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Accept-Datetime, Memento-Datetime or memento label could not be parsed
    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    /// No memento can satisfy a datetime negotiation
    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    /// Method is not supported on the target
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Structural rule violated (e.g. deleting a binary description directly)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound(_) | RepositoryError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            RepositoryError::TransactionClosed { .. } => ErrorKind::Closed,
            RepositoryError::Gone(_) => ErrorKind::Gone,
            RepositoryError::Conflict(_) | RepositoryError::CommitFailed { .. } => {
                ErrorKind::Conflict
            }
            RepositoryError::BadRequest(_)
            | RepositoryError::InvalidDatetime(_)
            | RepositoryError::Constraint(_) => ErrorKind::Invalid,
            RepositoryError::NotAcceptable(_) => ErrorKind::NotAcceptable,
            RepositoryError::MethodNotAllowed(_) => ErrorKind::NotAllowed,
            RepositoryError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code, shorthand for `self.kind().status_code()`
    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Create a not-found error for anything displayable
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        RepositoryError::NotFound(what.to_string())
    }

    /// Create a bad-request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        RepositoryError::BadRequest(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        RepositoryError::Storage(msg.into())
    }

    /// Whether this error is a not-found condition
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
