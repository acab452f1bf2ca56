//! Transaction lifecycle through the repository facade

use std::thread;
use std::time::Duration;

use archivum::{
    Graph, RepositoryConfig, RepositoryError, RequestContext, TransactionState, ATOMIC_EXPIRES_HEADER,
};

use crate::common::{id, title, TestRepo};

fn long_lived(t: &TestRepo) -> String {
    let head = t.repo.endpoints().begin();
    assert_eq!(head.status, 201);
    assert!(head.get(ATOMIC_EXPIRES_HEADER).is_some());
    let location = head.get("Location").unwrap();
    t.repo.provider().parse_tx_id(location).unwrap()
}

fn in_tx<T>(
    t: &TestRepo,
    tx_id: &str,
    f: impl FnOnce(&archivum::Transaction) -> archivum::Result<T>,
) -> archivum::Result<T> {
    t.repo
        .in_request(&RequestContext::new("a").with_atomic_id(tx_id), f)
}

// ============================================================================
// Commit and rollback
// ============================================================================

#[test]
fn test_long_lived_changes_invisible_until_commit() {
    let t = TestRepo::new();
    let tx_id = long_lived(&t);

    in_tx(&t, &tx_id, |tx| {
        t.repo
            .services()
            .create_container(tx, &id("a"), title("a", "draft"), false, None)
    })
    .unwrap();

    assert!(t.get("a").unwrap_err().is_not_found());
    assert!(t.sink.events().is_empty());

    // visible inside its own transaction
    let inside = in_tx(&t, &tx_id, |tx| t.repo.resources().get_resource(Some(tx), &id("a")));
    assert!(inside.is_ok());

    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);
    assert!(t.get("a").is_ok());
    assert_eq!(t.sink.events().len(), 1);
}

#[test]
fn test_long_lived_rollback_discards() {
    let t = TestRepo::new();
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo
            .services()
            .create_container(tx, &id("a"), Graph::new(), false, None)
    })
    .unwrap();

    assert_eq!(t.repo.endpoints().rollback(&tx_id).status, 204);
    assert!(t.get("a").unwrap_err().is_not_found());
    assert!(t.sink.events().is_empty());
    assert!(!t.repo.containment().has_children(None, &id("info:fedora")));
}

#[test]
fn test_closed_transaction_is_gone() {
    let t = TestRepo::new();
    let tx_id = long_lived(&t);
    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);

    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 410);
    assert_eq!(t.repo.endpoints().status(&tx_id).status, 410);

    let err = in_tx(&t, &tx_id, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::TransactionClosed { ref state, .. } if state == "committed"
    ));
}

#[test]
fn test_unknown_transaction_is_not_found() {
    let t = TestRepo::new();
    let id = "0f3c2a9e-4b7d-4c1e-9a2b-6d5e8f7a1b2c";
    assert_eq!(t.repo.endpoints().status(id).status, 404);
    assert_eq!(t.repo.endpoints().commit(id).status, 404);
    let err = in_tx(&t, id, |_| Ok(())).unwrap_err();
    assert!(matches!(err, RepositoryError::TransactionNotFound(_)));
}

#[test]
fn test_malformed_atomic_id_is_bad_request() {
    let t = TestRepo::new();
    let err = in_tx(&t, "not a transaction", |_| Ok(())).unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_effective_acl_read_during_transaction_follows_commit() {
    let t = TestRepo::new();
    t.container("a");
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo.services().create_acl(tx, &id("a"), Graph::new(), None)
    })
    .unwrap();

    assert!(t.repo.effective_acl(&id("a")).unwrap().is_none());
    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);

    let acl = t.repo.effective_acl(&id("a")).unwrap().unwrap();
    assert_eq!(acl.acl_id, id("a/fcr:acl"));
}

#[test]
fn test_effective_acl_unchanged_by_rollback() {
    let t = TestRepo::new();
    t.container("a");
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo.services().create_acl(tx, &id("a"), Graph::new(), None)
    })
    .unwrap();
    assert!(t.repo.effective_acl(&id("a")).unwrap().is_none());

    assert_eq!(t.repo.endpoints().rollback(&tx_id).status, 204);
    assert!(t.repo.effective_acl(&id("a")).unwrap().is_none());
}

// ============================================================================
// Expiry
// ============================================================================

#[test]
fn test_long_lived_expires_without_refresh() {
    let t = TestRepo::with_config(RepositoryConfig {
        session_timeout_ms: 60_000,
        ..RepositoryConfig::default()
    });
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo
            .services()
            .create_container(tx, &id("a"), Graph::new(), false, None)
    })
    .unwrap();

    t.clock.advance(Duration::from_secs(61));

    assert_eq!(t.repo.endpoints().status(&tx_id).status, 410);
    assert!(t.repo.transactions().lock_table().holders(&id("a")).is_none());
    assert!(t.get("a").unwrap_err().is_not_found());

    // the id is free again for a fresh request
    t.container("a");
    assert!(t.get("a").is_ok());
}

#[test]
fn test_refresh_extends_deadline() {
    let t = TestRepo::with_config(RepositoryConfig {
        session_timeout_ms: 60_000,
        ..RepositoryConfig::default()
    });
    let tx_id = long_lived(&t);

    t.clock.advance(Duration::from_secs(45));
    assert_eq!(t.repo.endpoints().refresh(&tx_id).status, 204);
    t.clock.advance(Duration::from_secs(45));

    // joining a transaction refreshes it as well
    in_tx(&t, &tx_id, |_| Ok(())).unwrap();
    t.clock.advance(Duration::from_secs(45));

    assert_eq!(t.repo.endpoints().status(&tx_id).status, 204);
    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);
}

#[test]
fn test_sweeper_expires_idle_transactions() {
    let t = TestRepo::with_config(RepositoryConfig {
        session_timeout_ms: 1_000,
        sweep_interval_ms: 10,
        ..RepositoryConfig::default()
    });
    let tx = t.repo.transactions().create();
    tx.set_short_lived(false);

    let (sweeper, handle) = t.repo.start_sweeper();
    t.clock.advance(Duration::from_secs(2));

    let mut waited = Duration::ZERO;
    while t.repo.transactions().active_count() > 0 && waited < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(10));
        waited += Duration::from_millis(10);
    }
    sweeper.shutdown();
    handle.join().unwrap();

    assert_eq!(tx.state(), TransactionState::Expired);
    assert_eq!(t.repo.transactions().active_count(), 0);
    assert!(t.repo.transactions().stats().expired >= 1);
}

// ============================================================================
// Locks across requests
// ============================================================================

#[test]
fn test_long_lived_holds_locks_between_requests() {
    let t = TestRepo::new();
    t.container("a");
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "held"), None)
    })
    .unwrap();

    let err = t
        .request("a", |tx| {
            t.repo
                .services()
                .replace_properties(tx, &id("a"), title("a", "blocked"), None)
        })
        .unwrap_err();
    assert_eq!(err.status_code(), 409);

    assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);
    t.request("a", |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "after"), None)
    })
    .unwrap();
    assert_eq!(t.describe("a").len(), 1);
}

#[test]
fn test_contended_lock_waits_when_configured() {
    let t = TestRepo::with_config(RepositoryConfig {
        lock_wait_timeout_ms: 5_000,
        ..RepositoryConfig::default()
    });
    t.container("a");
    let tx_id = long_lived(&t);
    in_tx(&t, &tx_id, |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "first"), None)
    })
    .unwrap();

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            t.request("a", |tx| {
                t.repo
                    .services()
                    .replace_properties(tx, &id("a"), title("a", "second"), None)
            })
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(t.repo.endpoints().commit(&tx_id).status, 204);
        waiter.join().unwrap().unwrap();
    });

    let graph = t.describe("a");
    assert!(graph.has(
        &id("a").full_id(),
        archivum::rdf::DC_TITLE,
        &archivum::Term::literal("second")
    ));
}

#[test]
fn test_version_creation_rejected_in_long_lived() {
    let t = TestRepo::new();
    t.container("a");
    let tx_id = long_lived(&t);
    let err = in_tx(&t, &tx_id, |tx| {
        t.repo.versioning().create_version(
            tx,
            &id("a"),
            &archivum::VersionRequest::default(),
            None,
        )
    })
    .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(
        err.to_string(),
        "Bad request: Version creation is not allowed within transactions."
    );
    // a failed request leaves the long-lived transaction open
    assert_eq!(t.repo.endpoints().status(&tx_id).status, 204);
}
