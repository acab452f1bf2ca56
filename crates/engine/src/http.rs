//! HTTP boundary contract
//!
//! Status codes, `Allow` sets and response heads for the operations this
//! engine exposes. Nothing here does I/O; a server maps [`ResponseHead`]
//! onto its own response type.
//!
//! | target                   | allowed                                   |
//! |--------------------------|-------------------------------------------|
//! | container                | GET HEAD OPTIONS POST PUT PATCH DELETE    |
//! | binary                   | GET HEAD OPTIONS PUT DELETE               |
//! | description              | GET HEAD OPTIONS PUT PATCH                |
//! | ACL                      | GET HEAD OPTIONS PUT PATCH DELETE         |
//! | tombstone                | DELETE (purge)                            |
//! | timemap, live original   | POST HEAD GET OPTIONS                     |
//! | timemap, deleted original| HEAD GET OPTIONS                          |
//! | memento                  | GET HEAD OPTIONS                          |

use std::fmt;
use std::sync::Arc;

use archivum_concurrency::{Transaction, TransactionManager};
use archivum_core::{memento, RepositoryError, Result};

use crate::provider::{TransactionProvider, ATOMIC_EXPIRES_HEADER};
use crate::resource::Resource;
use crate::versioning::MementoRef;

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Methods permitted on `target`, in `Allow` header order
pub fn allowed_methods(target: &Resource) -> Vec<Method> {
    use Method::*;
    match target {
        Resource::Container(_) => vec![Get, Head, Options, Post, Put, Patch, Delete],
        Resource::Binary(_) => vec![Get, Head, Options, Put, Delete],
        Resource::Description(_) => vec![Get, Head, Options, Put, Patch],
        Resource::Acl(_) => vec![Get, Head, Options, Put, Patch, Delete],
        Resource::Tombstone(_) => vec![Delete],
        Resource::TimeMap(t) if t.original_deleted => vec![Head, Get, Options],
        Resource::TimeMap(_) => vec![Post, Head, Get, Options],
        Resource::Memento(_) => vec![Get, Head, Options],
    }
}

/// `Allow` header value
pub fn allow_header(target: &Resource) -> String {
    allowed_methods(target)
        .iter()
        .map(Method::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reject a method the target does not allow
///
/// POST to the timemap of a deleted original is `Gone`; everything else
/// not allowed is `MethodNotAllowed`.
pub fn check_method(target: &Resource, method: Method) -> Result<()> {
    if allowed_methods(target).contains(&method) {
        return Ok(());
    }
    match target {
        Resource::TimeMap(t) if t.original_deleted && method == Method::Post => {
            Err(RepositoryError::Gone(t.original.to_string()))
        }
        _ => Err(RepositoryError::MethodNotAllowed(format!(
            "{} is not allowed on {}",
            method,
            target.id()
        ))),
    }
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code
    pub status: u16,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Head with no headers
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Header value, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 204
    pub fn no_content() -> Self {
        Self::new(204)
    }

    /// 201 for a new memento
    pub fn version_created(created: &MementoRef, base_uri: &str) -> Self {
        Self::new(201)
            .header("Location", created.id.to_uri(base_uri))
            .header("Memento-Datetime", created.memento_datetime())
    }

    /// 200 head of a memento representation
    pub fn memento(m: &MementoRef) -> Self {
        Self::new(200).header("Memento-Datetime", m.memento_datetime())
    }

    /// 302 from negotiation; no body, no `Memento-Datetime`
    pub fn negotiation_redirect(target: &MementoRef, base_uri: &str) -> Self {
        Self::new(302)
            .header("Location", target.id.to_uri(base_uri))
            .header("Vary", "Accept-Datetime")
            .header("Content-Length", "0")
    }

    /// 201 for a new long-lived transaction
    pub fn transaction_created(tx: &Transaction, location: String) -> Self {
        Self::new(201)
            .header("Location", location)
            .with_expiration(tx)
    }

    /// 204 with the transaction's expiration
    pub fn transaction_status(tx: &Transaction) -> Self {
        Self::no_content().with_expiration(tx)
    }

    /// Error head from the status mapping
    pub fn from_error(error: &RepositoryError) -> Self {
        Self::new(error.status_code())
    }

    fn with_expiration(self, tx: &Transaction) -> Self {
        match tx.expiration() {
            Some(at) => self.header(ATOMIC_EXPIRES_HEADER, memento::format_rfc1123(at)),
            None => self,
        }
    }
}

/// `fcr:tx` endpoints
pub struct TransactionEndpoints {
    manager: Arc<TransactionManager>,
    provider: Arc<TransactionProvider>,
}

impl TransactionEndpoints {
    /// Endpoints over `manager`
    pub fn new(manager: Arc<TransactionManager>, provider: Arc<TransactionProvider>) -> Self {
        Self { manager, provider }
    }

    /// POST `fcr:tx`: open a long-lived transaction
    pub fn begin(&self) -> ResponseHead {
        let tx = self.manager.create();
        tx.set_short_lived(false);
        ResponseHead::transaction_created(&tx, self.provider.transaction_uri(tx.id()))
    }

    /// PUT `fcr:tx/{id}`: commit
    pub fn commit(&self, tx_id: &str) -> ResponseHead {
        respond(self.manager.get(tx_id).and_then(|tx| tx.commit()), |_| {
            ResponseHead::no_content()
        })
    }

    /// DELETE `fcr:tx/{id}`: roll back
    pub fn rollback(&self, tx_id: &str) -> ResponseHead {
        respond(self.manager.get(tx_id).and_then(|tx| tx.rollback()), |_| {
            ResponseHead::no_content()
        })
    }

    /// POST `fcr:tx/{id}`: extend the deadline
    pub fn refresh(&self, tx_id: &str) -> ResponseHead {
        let result = self.manager.get(tx_id).and_then(|tx| {
            tx.refresh()?;
            Ok(tx)
        });
        respond(result, |tx| ResponseHead::transaction_status(&tx))
    }

    /// GET `fcr:tx/{id}`: report the deadline
    pub fn status(&self, tx_id: &str) -> ResponseHead {
        respond(self.manager.get(tx_id), |tx| ResponseHead::transaction_status(&tx))
    }
}

impl fmt::Debug for TransactionEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEndpoints").finish_non_exhaustive()
    }
}

fn respond<T>(result: Result<T>, ok: impl FnOnce(T) -> ResponseHead) -> ResponseHead {
    match result {
        Ok(value) => ok(value),
        Err(e) => ResponseHead::from_error(&e),
    }
}
