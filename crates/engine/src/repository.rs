//! Repository facade
//!
//! Wires storage, locking, transactions and the engine services together
//! from a [`RepositoryConfig`]. Every component is shared by `Arc` and
//! reachable through an accessor; [`Repository::in_request`] runs one
//! request's worth of work with the same commit/rollback/dispose sequence an
//! HTTP layer would use.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use archivum_concurrency::{
    LockTable, Transaction, TransactionManager, TransactionParticipant, TransactionSweeper,
};
use archivum_core::{ResourceId, Result};
use archivum_storage::{
    Clock, ContainmentIndex, EventAccumulator, EventSink, MemoryStorage, NoopEventSink,
    StorageBackend, SystemClock,
};

use crate::acl_cache::{AclCache, AclHandle};
use crate::config::RepositoryConfig;
use crate::delete::DeleteOrchestrator;
use crate::http::TransactionEndpoints;
use crate::provider::{RequestContext, TransactionProvider};
use crate::resource::{Resource, ResourceFactory};
use crate::services::ResourceServices;
use crate::versioning::VersioningEngine;

/// A fully wired repository
pub struct Repository {
    config: RepositoryConfig,
    storage: Arc<MemoryStorage>,
    containment: Arc<ContainmentIndex>,
    events: Arc<EventAccumulator>,
    acl_cache: Arc<AclCache>,
    manager: Arc<TransactionManager>,
    factory: Arc<ResourceFactory>,
    services: ResourceServices,
    versioning: VersioningEngine,
    deleter: DeleteOrchestrator,
    provider: Arc<TransactionProvider>,
    endpoints: TransactionEndpoints,
}

impl Repository {
    /// Repository on the system clock, discarding events
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(NoopEventSink))
    }

    /// Repository with an explicit clock and event sink
    pub fn with_parts(
        config: RepositoryConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
        storage.set_auto_versioning(config.auto_versioning);
        let locks = Arc::new(LockTable::with_wait_timeout(config.lock_wait_timeout()));
        let containment = Arc::new(ContainmentIndex::new());
        let events = Arc::new(EventAccumulator::new(sink));
        let acl_cache = Arc::new(AclCache::new());

        let manager = Arc::new(
            TransactionManager::new(storage.clone() as Arc<dyn StorageBackend>, locks)
                .with_participant(containment.clone() as Arc<dyn TransactionParticipant>)
                .with_participant(events.clone() as Arc<dyn TransactionParticipant>)
                .with_participant(acl_cache.clone() as Arc<dyn TransactionParticipant>)
                .with_clock(clock)
                .with_session_timeout(config.session_timeout())
                .with_closed_retention(config.closed_retention()),
        );

        let factory = Arc::new(ResourceFactory::new(
            storage.clone() as Arc<dyn StorageBackend>,
            containment.clone(),
        ));
        let services = ResourceServices::new(
            factory.clone(),
            containment.clone(),
            events.clone(),
            acl_cache.clone(),
        );
        let versioning = VersioningEngine::new(factory.clone(), events.clone(), config.base_uri());
        let deleter = DeleteOrchestrator::new(
            factory.clone(),
            containment.clone(),
            events.clone(),
            acl_cache.clone(),
        );
        let provider = Arc::new(TransactionProvider::new(manager.clone(), config.base_uri()));
        let endpoints = TransactionEndpoints::new(manager.clone(), provider.clone());

        info!(
            target: "archivum::txn",
            base_uri = config.base_uri(),
            auto_versioning = config.auto_versioning,
            "Repository opened"
        );
        Ok(Self {
            config,
            storage,
            containment,
            events,
            acl_cache,
            manager,
            factory,
            services,
            versioning,
            deleter,
            provider,
            endpoints,
        })
    }

    /// Start the expiry sweeper at the configured interval
    pub fn start_sweeper(&self) -> (Arc<TransactionSweeper>, JoinHandle<()>) {
        let sweeper = Arc::new(TransactionSweeper::new(
            self.manager.clone(),
            self.config.sweep_interval(),
        ));
        let handle = sweeper.start();
        (sweeper, handle)
    }

    /// Run `f` in the request's transaction
    ///
    /// A short-lived transaction is committed on success (unless `f` already
    /// ended it) and rolled back on error; either way it is disposed of
    /// afterwards. A long-lived transaction is only refreshed.
    pub fn in_request<T>(
        &self,
        ctx: &RequestContext,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        let tx = self.provider.provide(ctx)?;
        let result = f(&tx).and_then(|value| {
            if tx.is_short_lived() && tx.is_open() {
                tx.commit()?;
            }
            Ok(value)
        });
        if result.is_err() && tx.is_short_lived() && tx.is_open() {
            if let Err(e) = tx.rollback() {
                warn!(target: "archivum::txn", tx = %tx.id(), error = %e, "Rollback after failed request");
            }
        }
        self.provider.dispose(&tx);
        result
    }

    /// Resolve `id` outside any transaction
    pub fn get(&self, id: &ResourceId) -> Result<Resource> {
        self.factory.get_resource(None, id)
    }

    /// ACL governing `id`: its own live ACL or the nearest ancestor's
    pub fn effective_acl(&self, id: &ResourceId) -> Result<Option<AclHandle>> {
        self.acl_cache.get_or_load(id, || {
            let mut candidates = vec![id.base_id()];
            candidates.extend(id.base_id().ancestors());
            for candidate in candidates {
                if let Some(acl) = self.factory.acl_of(None, &candidate, false)? {
                    let acl_id = acl.id().clone();
                    let authorizations = self.factory.describe(None, &acl)?;
                    return Ok(Some(AclHandle {
                        acl_id,
                        authorizations,
                    }));
                }
            }
            Ok(None)
        })
    }

    /// Configuration
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Storage backend
    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }

    /// Containment index
    pub fn containment(&self) -> &Arc<ContainmentIndex> {
        &self.containment
    }

    /// Event accumulator
    pub fn events(&self) -> &Arc<EventAccumulator> {
        &self.events
    }

    /// ACL cache
    pub fn acl_cache(&self) -> &Arc<AclCache> {
        &self.acl_cache
    }

    /// Transaction manager
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Resource factory
    pub fn resources(&self) -> &Arc<ResourceFactory> {
        &self.factory
    }

    /// Mutation services
    pub fn services(&self) -> &ResourceServices {
        &self.services
    }

    /// Versioning engine
    pub fn versioning(&self) -> &VersioningEngine {
        &self.versioning
    }

    /// Delete orchestrator
    pub fn deleter(&self) -> &DeleteOrchestrator {
        &self.deleter
    }

    /// Transaction provider
    pub fn provider(&self) -> &Arc<TransactionProvider> {
        &self.provider
    }

    /// `fcr:tx` endpoints
    pub fn endpoints(&self) -> &TransactionEndpoints {
        &self.endpoints
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
