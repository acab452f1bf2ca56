//! End-to-end scenarios and cross-cutting properties

use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use archivum::{
    BinaryContent, Graph, InteractionModel, OperationType, Repository, RepositoryConfig,
    RequestContext, ResourceId, Term, Triple, CONFIG_FILE_NAME, ROOT_ID,
};

use crate::common::{id, title, TestRepo};

// ============================================================================
// Containment across versions
// ============================================================================

#[test]
fn test_containment_in_live_and_memento_views() {
    let t = TestRepo::new();
    t.container("a");
    let m1 = t.version("a");

    t.clock.advance(Duration::from_secs(1));
    t.container("a/x");
    t.clock.advance(Duration::from_secs(1));
    let m2 = t.version("a");
    t.clock.advance(Duration::from_secs(1));
    t.delete("a/x");

    let live = t.describe("a");
    assert!(!TestRepo::lists_child(&live, "a", "a/x"));

    let at = |m: &archivum::MementoRef| {
        let memento = t.repo.versioning().get_memento(None, &m.id).unwrap();
        t.repo.resources().describe(None, &memento).unwrap()
    };
    assert!(!TestRepo::lists_child(&at(&m1), "a", "a/x"));
    assert!(TestRepo::lists_child(&at(&m2), "a", "a/x"));
}

#[test]
fn test_container_lists_live_children() {
    let t = TestRepo::new();
    t.container("a");
    t.container("a/b");
    t.binary("a/f", "bytes");

    let graph = t.describe("a");
    assert!(TestRepo::lists_child(&graph, "a", "a/b"));
    assert!(TestRepo::lists_child(&graph, "a", "a/f"));
    assert!(!TestRepo::lists_child(&graph, "a", "a/f/fcr:metadata"));
    assert!(TestRepo::lists_child(&t.describe(ROOT_ID), ROOT_ID, "a"));
}

#[test]
fn test_create_parent_is_nearest_existing_ancestor() {
    let t = TestRepo::new();
    t.container("a");
    t.container("a/b/c");

    let headers = t.repo.resources().headers(None, &id("a/b/c")).unwrap();
    assert_eq!(headers.parent, Some(id("a")));
    assert!(TestRepo::lists_child(&t.describe("a"), "a", "a/b/c"));
    assert!(t.get("a/b").unwrap_err().is_not_found());
}

// ============================================================================
// Round trips
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_container_triples_round_trip(
        values in prop::collection::vec("[a-zA-Z0-9 ]{0,16}", 0..6)
    ) {
        let t = TestRepo::new();
        let subject = id("a").full_id();
        let mut triples = Graph::new();
        for (i, value) in values.iter().enumerate() {
            triples.insert(Triple::new(
                subject.clone(),
                format!("http://example.org/p{}", i),
                Term::literal(value.as_str()),
            ));
        }

        t.request("a", |tx| {
            t.repo
                .services()
                .create_container(tx, &id("a"), triples.clone(), false, Some("alice"))
        })
        .unwrap();

        prop_assert_eq!(t.describe("a"), triples);
        let headers = t.repo.resources().headers(None, &id("a")).unwrap();
        prop_assert_eq!(headers.interaction_model, InteractionModel::BasicContainer);
        prop_assert_eq!(headers.parent, Some(ResourceId::root()));
        prop_assert_eq!(headers.created_by.as_deref(), Some("alice"));
        prop_assert!(!headers.deleted);
    }

    #[test]
    fn prop_binary_content_round_trip(content in prop::collection::vec(any::<u8>(), 1..256)) {
        let t = TestRepo::new();
        t.request("b", |tx| {
            t.repo.services().create_binary(
                tx,
                &id("b"),
                BinaryContent::new(content.clone(), "application/octet-stream")
                    .with_filename("blob.bin"),
                None,
            )
        })
        .unwrap();

        let binary = t.get("b").unwrap();
        prop_assert_eq!(t.repo.resources().content(None, &binary, None).unwrap(), content.clone());
        let headers = binary.headers().unwrap();
        prop_assert_eq!(headers.content_size, Some(content.len() as u64));
        prop_assert_eq!(headers.mime_type.as_deref(), Some("application/octet-stream"));
        prop_assert_eq!(headers.filename.as_deref(), Some("blob.bin"));

        let last = content.len() as u64 - 1;
        let tail = t.repo.resources().content(None, &binary, Some((last, last))).unwrap();
        prop_assert_eq!(tail, vec![content[content.len() - 1]]);
    }
}

// ============================================================================
// Archival groups and concurrency
// ============================================================================

#[test]
fn test_archival_group_members_serialize() {
    let t = TestRepo::new();
    t.archival_group("ag");
    t.container("ag/m1");
    t.container("ag/m2");

    let tx = t.repo.transactions().create();
    tx.set_short_lived(false);
    let ctx = RequestContext::new("ag/m1").with_atomic_id(tx.id());
    t.repo
        .in_request(&ctx, |tx| {
            t.repo
                .services()
                .replace_properties(tx, &id("ag/m1"), title("ag/m1", "one"), None)
        })
        .unwrap();

    // a different member of the same group is blocked by the group lock
    let err = t
        .request("ag/m2", |tx| {
            t.repo
                .services()
                .replace_properties(tx, &id("ag/m2"), title("ag/m2", "two"), None)
        })
        .unwrap_err();
    assert_eq!(err.status_code(), 409);

    tx.commit().unwrap();
    t.request("ag/m2", |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("ag/m2"), title("ag/m2", "two"), None)
    })
    .unwrap();
}

#[test]
fn test_nested_archival_group_rejected() {
    let t = TestRepo::new();
    t.archival_group("ag");
    let err = t
        .request("ag/inner", |tx| {
            t.repo
                .services()
                .create_container(tx, &id("ag/inner"), Graph::new(), true, None)
        })
        .unwrap_err();
    assert!(matches!(err, archivum::RepositoryError::Constraint(_)));
}

#[test]
fn test_concurrent_children_of_plain_container() {
    let t = TestRepo::new();
    t.container("a");

    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = &t;
                s.spawn(move || {
                    let path = format!("a/child-{}", i);
                    t.request(&path, |tx| {
                        t.repo
                            .services()
                            .create_container(tx, &id(&path), Graph::new(), false, None)
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    });

    assert_eq!(t.repo.containment().contains(None, &id("a")).len(), 8);
}

#[test]
fn test_concurrent_group_updates_all_land_with_lock_wait() {
    let t = TestRepo::with_config(RepositoryConfig {
        lock_wait_timeout_ms: 10_000,
        ..RepositoryConfig::default()
    });
    t.archival_group("ag");
    for i in 0..4 {
        t.container(&format!("ag/m{}", i));
    }
    t.sink.clear();

    thread::scope(|s| {
        for i in 0..4 {
            let t = &t;
            s.spawn(move || {
                let path = format!("ag/m{}", i);
                t.request(&path, |tx| {
                    t.repo
                        .services()
                        .replace_properties(tx, &id(&path), title(&path, "updated"), None)
                })
                .unwrap();
            });
        }
    });

    let updates = t
        .sink
        .events()
        .into_iter()
        .filter(|e| e.operation == OperationType::Update)
        .count();
    assert_eq!(updates, 4);
    assert!(t.repo.transactions().lock_table().holders(&id("ag")).is_none());
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_events_follow_commits() {
    let t = TestRepo::new();
    t.request("a", |tx| {
        t.repo
            .services()
            .create_container(tx, &id("a"), Graph::new(), false, Some("alice"))?;
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "x"), Some("alice"))
    })
    .unwrap();
    t.version("a");
    t.delete("a");

    let events = t.sink.events();
    let ops: Vec<OperationType> = events.iter().map(|e| e.operation).collect();
    assert_eq!(
        ops,
        vec![
            OperationType::Create,
            OperationType::Update,
            OperationType::CreateVersion,
            OperationType::Delete,
        ]
    );
    assert_eq!(events[0].user_principal.as_deref(), Some("alice"));
    assert_eq!(events[0].transaction_id, events[1].transaction_id);
    assert_ne!(events[1].transaction_id, events[2].transaction_id);

    // a failed request emits nothing
    t.sink.clear();
    assert!(t
        .request("a", |tx| {
            t.repo
                .services()
                .replace_properties(tx, &id("a"), Graph::new(), None)
        })
        .is_err());
    assert!(t.sink.events().is_empty());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_repository_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    RepositoryConfig::write_default_if_missing(&path).unwrap();

    let mut config = RepositoryConfig::from_file(&path).unwrap();
    assert_eq!(config, RepositoryConfig::default());

    config.base_uri = "https://repo.example.org/rest/".to_string();
    config.auto_versioning = true;
    config.write_to_file(&path).unwrap();

    let loaded = RepositoryConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);

    let repo = Repository::new(loaded).unwrap();
    assert_eq!(repo.config().base_uri(), "https://repo.example.org/rest");
    assert_eq!(
        repo.provider().transaction_uri("abc"),
        "https://repo.example.org/rest/fcr:tx/abc"
    );
}

#[test]
fn test_bad_config_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "session_timeout_ms = 0\n").unwrap();
    assert_eq!(RepositoryConfig::from_file(&path).unwrap_err().status_code(), 400);

    std::fs::write(&path, "base_uri = [").unwrap();
    assert!(RepositoryConfig::from_file(&path).is_err());
}
