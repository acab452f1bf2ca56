//! Shared fixtures for engine unit tests

use std::sync::Arc;

use archivum_concurrency::{LockTable, Transaction, TransactionManager, TransactionParticipant};
use archivum_core::rdf::DC_TITLE;
use archivum_core::{Graph, ResourceId, Result, Term, Timestamp, Triple};
use archivum_storage::{
    ContainmentIndex, EventAccumulator, ManualClock, MemoryStorage, RecordingEventSink,
    StorageBackend,
};

use crate::acl_cache::AclCache;
use crate::delete::{DeleteMode, DeleteOrchestrator};
use crate::resource::ResourceFactory;
use crate::services::ResourceServices;
use crate::versioning::VersioningEngine;

/// 2017-08-29T15:47:50Z
pub const START: u64 = 1_504_021_670;

pub fn id(path: &str) -> ResourceId {
    ResourceId::parse(path).unwrap()
}

pub fn title(subject: &str, value: &str) -> Graph {
    Graph::new().with(Triple::new(
        id(subject).full_id(),
        DC_TITLE,
        Term::literal(value),
    ))
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub containment: Arc<ContainmentIndex>,
    pub sink: Arc<RecordingEventSink>,
    pub acl_cache: Arc<AclCache>,
    pub manager: TransactionManager,
    pub factory: Arc<ResourceFactory>,
    pub services: ResourceServices,
    pub versioning: VersioningEngine,
    pub deleter: DeleteOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(START)));
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::with_clock(clock.clone()));
        let containment = Arc::new(ContainmentIndex::new());
        let sink = Arc::new(RecordingEventSink::new());
        let events = Arc::new(EventAccumulator::new(sink.clone()));
        let acl_cache = Arc::new(AclCache::new());
        let manager = TransactionManager::new(storage.clone(), Arc::new(LockTable::new()))
            .with_participant(containment.clone() as Arc<dyn TransactionParticipant>)
            .with_participant(events.clone() as Arc<dyn TransactionParticipant>)
            .with_participant(acl_cache.clone() as Arc<dyn TransactionParticipant>)
            .with_clock(clock.clone());
        let factory = Arc::new(ResourceFactory::new(storage, containment.clone()));
        Self {
            services: ResourceServices::new(
                factory.clone(),
                containment.clone(),
                events.clone(),
                acl_cache.clone(),
            ),
            versioning: VersioningEngine::new(
                factory.clone(),
                events.clone(),
                "http://localhost:8080/rest",
            ),
            deleter: DeleteOrchestrator::new(
                factory.clone(),
                containment.clone(),
                events,
                acl_cache.clone(),
            ),
            clock,
            containment,
            sink,
            acl_cache,
            manager,
            factory,
        }
    }

    /// Run `f` in a new transaction and commit it if still open
    pub fn commit<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> T {
        let tx = self.manager.create();
        let value = f(&tx).unwrap();
        if tx.is_open() {
            tx.commit().unwrap();
        }
        value
    }

    pub fn container(&self, path: &str) {
        self.commit(|tx| {
            self.services
                .create_container(tx, &id(path), Graph::new(), false, None)
        });
    }

    pub fn delete(&self, target: &ResourceId) {
        let resource = self.factory.get_resource(None, target).unwrap();
        self.commit(|tx| self.deleter.perform(tx, &resource, DeleteMode::Delete, None));
    }
}
