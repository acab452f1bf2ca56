//! Event recording
//!
//! Mutations are recorded per transaction as they are staged and emitted to
//! an [`EventSink`] once the transaction commits, one event per mutation.
//! Rolled-back transactions emit nothing.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use archivum_core::{OperationType, ResourceId, ResourceOperation, Result, Timestamp};

use crate::participant::TransactionParticipant;

/// One committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceEvent {
    /// Transaction that committed it
    pub transaction_id: String,
    /// Affected resource
    pub resource_id: ResourceId,
    /// What happened
    pub operation: OperationType,
    /// Acting principal
    pub user_principal: Option<String>,
    /// Commit instant
    pub instant: Timestamp,
}

/// Consumer of committed events; fire-and-forget
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: ResourceEvent);
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ResourceEvent) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ResourceEvent>>,
}

impl RecordingEventSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.events.lock().clone()
    }

    /// Drop all received events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ResourceEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug, Clone)]
struct PendingEvent {
    resource_id: ResourceId,
    operation: OperationType,
    user_principal: Option<String>,
}

/// Per-transaction event buffer feeding an [`EventSink`]
pub struct EventAccumulator {
    pending: DashMap<String, Vec<PendingEvent>>,
    sink: Arc<dyn EventSink>,
}

impl EventAccumulator {
    /// Accumulator emitting to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            pending: DashMap::new(),
            sink,
        }
    }

    /// Buffer an event for a staged operation
    pub fn record(&self, tx_id: &str, operation: &ResourceOperation) {
        self.pending
            .entry(tx_id.to_string())
            .or_default()
            .push(PendingEvent {
                resource_id: operation.resource_id.clone(),
                operation: operation.operation_type(),
                user_principal: operation.user_principal.clone(),
            });
    }

    /// Number of buffered events for `tx_id`
    pub fn pending_count(&self, tx_id: &str) -> usize {
        self.pending.get(tx_id).map_or(0, |events| events.len())
    }
}

impl std::fmt::Debug for EventAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventAccumulator")
            .field("transactions", &self.pending.len())
            .finish()
    }
}

impl TransactionParticipant for EventAccumulator {
    fn name(&self) -> &'static str {
        "events"
    }

    fn commit(&self, tx_id: &str, instant: Timestamp) -> Result<()> {
        if let Some((_, events)) = self.pending.remove(tx_id) {
            debug!(target: "archivum::storage", tx = tx_id, events = events.len(), "Emitting events");
            for event in events {
                self.sink.emit(ResourceEvent {
                    transaction_id: tx_id.to_string(),
                    resource_id: event.resource_id,
                    operation: event.operation,
                    user_principal: event.user_principal,
                    instant,
                });
            }
        }
        Ok(())
    }

    fn rollback(&self, tx_id: &str) {
        self.pending.remove(tx_id);
    }
}
