//! Per-request transaction resolution
//!
//! A request joins a long-lived transaction when it names one, either in
//! the `Atomic-ID` header (bare id or `{base}/fcr:tx/{id}`) or through a
//! `fcr:tx/{id}` path segment. Otherwise it gets a fresh short-lived
//! transaction that is disposed of when the request ends.

use std::sync::Arc;

use tracing::debug;

use archivum_concurrency::{Transaction, TransactionManager};
use archivum_core::{id::FCR_TX, RepositoryError, Result};

/// Request header naming a long-lived transaction
pub const ATOMIC_ID_HEADER: &str = "Atomic-ID";

/// Response header carrying a transaction's expiration
pub const ATOMIC_EXPIRES_HEADER: &str = "Atomic-Expires";

/// What the provider needs to know about a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// `Atomic-ID` header value
    pub atomic_id: Option<String>,
    /// Request path, relative to the base URI
    pub path: String,
    /// `User-Agent` header value
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Context for a request to `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the `Atomic-ID` header
    pub fn with_atomic_id(mut self, value: impl Into<String>) -> Self {
        self.atomic_id = Some(value.into());
        self
    }

    /// Set the `User-Agent` header
    pub fn with_user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }
}

/// Resolves, refreshes and disposes request transactions
pub struct TransactionProvider {
    manager: Arc<TransactionManager>,
    base_uri: String,
}

impl TransactionProvider {
    /// Provider over `manager`; `base_uri` prefixes transaction URIs
    pub fn new(manager: Arc<TransactionManager>, base_uri: impl Into<String>) -> Self {
        Self {
            manager,
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
        }
    }

    /// URI of a transaction
    pub fn transaction_uri(&self, tx_id: &str) -> String {
        format!("{}/{}/{}", self.base_uri, FCR_TX, tx_id)
    }

    /// Extract the id from an `Atomic-ID` value
    pub fn parse_tx_id(&self, value: &str) -> Result<String> {
        let value = value.trim();
        let prefix = format!("{}/{}/", self.base_uri, FCR_TX);
        let candidate = value.strip_prefix(prefix.as_str()).unwrap_or(value);
        if is_tx_id(candidate) {
            Ok(candidate.to_string())
        } else {
            Err(RepositoryError::bad_request(format!(
                "Invalid transaction id: {}",
                value
            )))
        }
    }

    /// Transaction id named by a `fcr:tx/{id}` path segment
    pub fn tx_id_from_path(path: &str) -> Option<String> {
        let mut segments = path.split('/').skip_while(|s| *s != FCR_TX);
        segments.next()?;
        segments
            .next()
            .filter(|id| is_tx_id(id))
            .map(str::to_string)
    }

    /// Existing transaction named by the request, or a new short-lived one
    pub fn transaction_for_request(&self, ctx: &RequestContext) -> Result<Arc<Transaction>> {
        if let Some(header) = &ctx.atomic_id {
            let id = self.parse_tx_id(header)?;
            return self.manager.get(&id);
        }
        if let Some(id) = Self::tx_id_from_path(&ctx.path) {
            return self.manager.get(&id);
        }
        let tx = self.manager.create();
        tx.set_base_uri(self.base_uri.clone());
        if let Some(agent) = &ctx.user_agent {
            tx.set_user_agent(agent.clone());
        }
        Ok(tx)
    }

    /// Resolve the request's transaction, refreshing a long-lived one
    pub fn provide(&self, ctx: &RequestContext) -> Result<Arc<Transaction>> {
        let tx = self.transaction_for_request(ctx)?;
        if !tx.is_short_lived() {
            tx.refresh()?;
            debug!(target: "archivum::txn", tx = %tx.id(), "Joined long-lived transaction");
        }
        Ok(tx)
    }

    /// End-of-request cleanup: a short-lived transaction releases its locks
    /// and expires; a long-lived one is left alone
    pub fn dispose(&self, tx: &Transaction) {
        if tx.is_short_lived() {
            tx.release_resource_locks_if_short_lived();
            tx.expire();
        }
    }
}

impl std::fmt::Debug for TransactionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionProvider")
            .field("base_uri", &self.base_uri)
            .finish_non_exhaustive()
    }
}

fn is_tx_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}
