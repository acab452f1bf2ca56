//! Mementos, TimeMaps and datetime negotiation

use std::thread;
use std::time::Duration;

use proptest::prelude::*;

use archivum::{
    check_method, BinaryContent, Method, RepositoryConfig, RepositoryError, Resource, ResponseHead,
    Term, Timestamp, VersionRequest,
};
use archivum::rdf::DC_TITLE;

use crate::common::{id, rfc1123, title, TestRepo, START};

const BASE: &str = "http://localhost:8080/rest";

// ============================================================================
// Version creation
// ============================================================================

#[test]
fn test_version_labels_and_headers() {
    let t = TestRepo::new();
    t.container("a");

    let m = t.version("a");
    assert_eq!(m.label, "20170829154750");
    assert_eq!(m.memento_datetime(), "Tue, 29 Aug 2017 15:47:50 GMT");

    let head = ResponseHead::version_created(&m, BASE);
    assert_eq!(head.status, 201);
    assert_eq!(
        head.get("Location"),
        Some("http://localhost:8080/rest/a/fcr:versions/20170829154750")
    );
    assert_eq!(head.get("memento-datetime"), Some("Tue, 29 Aug 2017 15:47:50 GMT"));
}

#[test]
fn test_same_second_versions_get_precise_labels() {
    let t = TestRepo::new();
    t.container("a");
    let first = t.version("a");
    let second = t.version("a");

    assert_eq!(first.label.len(), 14);
    assert_eq!(second.label.len(), 20);
    assert!(second.label.starts_with(&first.label));
    assert!(first.instant < second.instant);

    // both labels resolve to their own memento
    for m in [&first, &second] {
        match t.repo.versioning().get_memento(None, &m.id).unwrap() {
            Resource::Memento(view) => assert_eq!(view.instant, m.instant),
            other => panic!("expected memento, got {:?}", other.kind()),
        }
    }
}

#[test]
fn test_concurrent_versions_each_get_their_own_memento() {
    let t = TestRepo::with_config(RepositoryConfig {
        lock_wait_timeout_ms: 10_000,
        ..RepositoryConfig::default()
    });
    t.container("a");

    let mut created: Vec<archivum::MementoRef> = thread::scope(|s| {
        let handles: Vec<_> = (0..6).map(|_| s.spawn(|| t.version("a"))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    created.sort_by_key(|m| m.instant);

    let listed = t.repo.versioning().mementos(None, &id("a")).unwrap();
    assert_eq!(listed, created);
    for pair in created.windows(2) {
        assert_ne!(pair[0].label, pair[1].label);
    }
}

#[test]
fn test_version_request_rejections() {
    let t = TestRepo::new();
    t.container("a");
    let m = t.version("a");

    let with = |request: VersionRequest, target: &archivum::ResourceId| {
        t.request("a/fcr:versions", |tx| {
            t.repo.versioning().create_version(tx, target, &request, None)
        })
        .unwrap_err()
    };

    let slug = VersionRequest {
        slug: Some("mine".to_string()),
        ..VersionRequest::default()
    };
    assert_eq!(with(slug, &id("a")).status_code(), 400);

    let dated = VersionRequest {
        memento_datetime: Some(rfc1123(START)),
        ..VersionRequest::default()
    };
    assert_eq!(with(dated, &id("a")).status_code(), 400);

    assert_eq!(with(VersionRequest::default(), &m.id).status_code(), 405);
    assert_eq!(t.repo.versioning().mementos(None, &id("a")).unwrap().len(), 1);
}

#[test]
fn test_memento_keeps_state_at_creation() {
    let t = TestRepo::new();
    t.request("a", |tx| {
        t.repo
            .services()
            .create_container(tx, &id("a"), title("a", "one"), false, None)
    })
    .unwrap();
    let m = t.version("a");

    t.clock.advance(Duration::from_secs(5));
    t.request("a", |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "two"), None)
    })
    .unwrap();

    let subject = id("a").full_id();
    let memento = t.repo.versioning().get_memento(None, &m.id).unwrap();
    let then = t.repo.resources().describe(None, &memento).unwrap();
    assert!(then.has(&subject, DC_TITLE, &Term::literal("one")));
    assert!(!then.has(&subject, DC_TITLE, &Term::literal("two")));

    let now = t.describe("a");
    assert!(now.has(&subject, DC_TITLE, &Term::literal("two")));
}

#[test]
fn test_binary_versions_with_description() {
    let t = TestRepo::new();
    t.binary("b", "first");
    let m = t.version("b");

    t.clock.advance(Duration::from_secs(1));
    t.request("b", |tx| {
        t.repo.services().replace_binary(
            tx,
            &id("b"),
            BinaryContent::new("second", "text/plain"),
            None,
        )
    })
    .unwrap();

    let memento = t.repo.versioning().get_memento(None, &m.id).unwrap();
    assert!(memento.has_content());
    assert_eq!(
        t.repo.resources().content(None, &memento, None).unwrap(),
        b"first".to_vec()
    );
    assert_eq!(
        t.repo.resources().content(None, &memento, Some((1, 3))).unwrap(),
        b"irs".to_vec()
    );
    let live = t.get("b").unwrap();
    assert_eq!(t.repo.resources().content(None, &live, None).unwrap(), b"second".to_vec());

    let description = t.repo.versioning().mementos(None, &id("b").as_description()).unwrap();
    assert_eq!(description.len(), 1);
    assert_eq!(description[0].instant, m.instant);
}

#[test]
fn test_archival_group_versions_with_members() {
    let t = TestRepo::new();
    t.archival_group("ag");
    t.container("ag/m");

    let root = t.version("ag");
    let members = t.repo.versioning().mementos(None, &id("ag/m")).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].instant, root.instant);

    // versioning a member versions the group; the member is always included
    t.clock.advance(Duration::from_secs(1));
    let member = t.version("ag/m");
    assert_eq!(member.id, id("ag/m").as_memento(member.label.clone()));
    let group = t.repo.versioning().mementos(None, &id("ag")).unwrap();
    assert_eq!(group.len(), 2);
    assert_eq!(group[1].instant, member.instant);
    assert_eq!(t.repo.versioning().mementos(None, &id("ag/m")).unwrap().len(), 2);
}

#[test]
fn test_archival_group_member_timemaps_list_only_their_changes() {
    let t = TestRepo::with_config(RepositoryConfig {
        auto_versioning: true,
        ..RepositoryConfig::default()
    });
    let seconds = |path: &str| -> Vec<u64> {
        t.repo
            .versioning()
            .mementos(None, &id(path))
            .unwrap()
            .into_iter()
            .map(|m| m.instant.as_secs() - START)
            .collect()
    };

    t.archival_group("ag");
    t.clock.advance(Duration::from_secs(1));
    t.binary("ag/child1", "v2");
    t.clock.advance(Duration::from_secs(1));
    t.binary("ag/child2", "v3");
    t.clock.advance(Duration::from_secs(1));
    t.request("ag/child1", |tx| {
        t.repo.services().replace_binary(
            tx,
            &id("ag/child1"),
            BinaryContent::new("v4", "application/octet-stream"),
            None,
        )
    })
    .unwrap();

    assert_eq!(seconds("ag"), vec![0, 1, 2, 3]);
    assert_eq!(seconds("ag/child1"), vec![1, 3]);
    assert_eq!(seconds("ag/child1/fcr:metadata"), vec![1, 3]);
    assert_eq!(seconds("ag/child2"), vec![2]);

    // the member memento at the group's latest version holds the new bytes
    let latest = t.repo.versioning().mementos(None, &id("ag/child1")).unwrap();
    let memento = t.repo.versioning().get_memento(None, &latest[1].id).unwrap();
    assert_eq!(
        t.repo.resources().content(None, &memento, None).unwrap(),
        b"v4".to_vec()
    );
}

#[test]
fn test_auto_versioning_on_create_and_update() {
    let t = TestRepo::with_config(RepositoryConfig {
        auto_versioning: true,
        ..RepositoryConfig::default()
    });
    t.container("a");
    assert_eq!(t.repo.versioning().mementos(None, &id("a")).unwrap().len(), 1);

    t.clock.advance(Duration::from_secs(1));
    t.request("a", |tx| {
        t.repo
            .services()
            .replace_properties(tx, &id("a"), title("a", "x"), None)
    })
    .unwrap();
    assert_eq!(t.repo.versioning().mementos(None, &id("a")).unwrap().len(), 2);

    t.delete("a");
    assert_eq!(t.repo.versioning().mementos(None, &id("a")).unwrap().len(), 2);
}

// ============================================================================
// TimeMap
// ============================================================================

#[test]
fn test_timemap_link_format() {
    let t = TestRepo::new();
    t.container("a");
    t.version("a");

    let links = t.repo.versioning().timemap_links(None, &id("a")).unwrap();
    let rels: Vec<&str> = links.iter().map(|l| l.rel.as_str()).collect();
    assert_eq!(rels, vec!["original", "timegate", "memento", "self"]);
    assert_eq!(links[2].get("datetime"), Some("Tue, 29 Aug 2017 15:47:50 GMT"));
    assert!(links[3].get("from").is_none());

    t.clock.advance(Duration::from_secs(60));
    t.version("a");
    let body = t.repo.versioning().timemap_link_format(None, &id("a")).unwrap();
    assert!(body.starts_with("<http://localhost:8080/rest/a>;rel=\"original\""));
    assert!(body.contains(";from=\"Tue, 29 Aug 2017 15:47:50 GMT\""));
    assert!(body.contains(";until=\"Tue, 29 Aug 2017 15:48:50 GMT\""));
    assert_eq!(body.lines().count(), 5);
}

#[test]
fn test_timemap_survives_deletion() {
    let t = TestRepo::new();
    t.container("a");
    let m = t.version("a");
    t.delete("a");

    let timemap = t.get("a/fcr:versions").unwrap();
    match &timemap {
        Resource::TimeMap(view) => {
            assert!(view.original_deleted);
            assert_eq!(view.versions, vec![m.instant]);
        }
        other => panic!("expected timemap, got {:?}", other.kind()),
    }
    assert!(check_method(&timemap, Method::Get).is_ok());
    assert!(matches!(
        check_method(&timemap, Method::Post),
        Err(RepositoryError::Gone(_))
    ));
    assert_eq!(
        check_method(&timemap, Method::Delete).unwrap_err().status_code(),
        405
    );

    let err = t.try_version("a").unwrap_err();
    assert!(matches!(err, RepositoryError::Gone(_)));

    // the memento itself stays readable
    assert!(t.repo.versioning().get_memento(None, &m.id).is_ok());
}

// ============================================================================
// Negotiation
// ============================================================================

#[test]
fn test_negotiation_picks_latest_not_after() {
    let t = TestRepo::new();
    t.container("a");
    let v0 = t.version("a");
    t.clock.advance(Duration::from_secs(10));
    let v1 = t.version("a");
    t.clock.advance(Duration::from_secs(10));
    let v2 = t.version("a");

    let pick = |secs: u64| {
        t.repo
            .versioning()
            .negotiate(None, &id("a"), &rfc1123(secs))
            .unwrap()
            .label
    };
    assert_eq!(pick(START + 15), v1.label);
    assert_eq!(pick(START + 10), v1.label);
    assert_eq!(pick(START + 3600), v2.label);
    assert_eq!(pick(START - 3600), v0.label);

    let chosen = t.repo.versioning().negotiate(None, &id("a"), &rfc1123(START + 15)).unwrap();
    let head = ResponseHead::negotiation_redirect(&chosen, BASE);
    assert_eq!(head.status, 302);
    assert_eq!(head.get("Location"), Some(chosen.id.to_uri(BASE).as_str()));
    assert_eq!(head.get("Vary"), Some("Accept-Datetime"));
    assert!(head.get("Memento-Datetime").is_none());
}

#[test]
fn test_negotiation_errors() {
    let t = TestRepo::new();
    t.container("a");

    let err = t
        .repo
        .versioning()
        .negotiate(None, &id("a"), "yesterday")
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = t
        .repo
        .versioning()
        .negotiate(None, &id("a"), &rfc1123(START))
        .unwrap_err();
    assert_eq!(err.status_code(), 406);

    let missing = t
        .repo
        .versioning()
        .negotiate(None, &id("nope"), &rfc1123(START))
        .unwrap_err();
    assert!(missing.is_not_found());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_versions_strictly_ascending_with_unique_labels(
        gaps in prop::collection::vec(0u64..2_500, 1..8)
    ) {
        let t = TestRepo::new();
        t.container("a");
        let mut created = Vec::new();
        for gap in &gaps {
            t.clock.advance(Duration::from_millis(*gap));
            created.push(t.version("a"));
        }

        let listed = t.repo.versioning().mementos(None, &id("a")).unwrap();
        prop_assert_eq!(listed.len(), gaps.len());
        prop_assert_eq!(&listed, &created);
        for pair in listed.windows(2) {
            prop_assert!(pair[0].instant < pair[1].instant);
            prop_assert_ne!(&pair[0].label, &pair[1].label);
        }
    }

    #[test]
    fn prop_negotiation_never_picks_later_than_requested(
        gaps in prop::collection::vec(1u64..30, 1..6),
        offset in 0u64..200,
    ) {
        let t = TestRepo::new();
        t.container("a");
        let mut instants = Vec::new();
        for gap in &gaps {
            t.clock.advance(Duration::from_secs(*gap));
            instants.push(t.version("a").instant);
        }

        let requested = Timestamp::from_secs(START + offset);
        let chosen = t
            .repo
            .versioning()
            .negotiate(None, &id("a"), &archivum::memento::format_rfc1123(requested))
            .unwrap();

        let not_after: Vec<&Timestamp> = instants
            .iter()
            .filter(|i| !i.truncate_to_secs().is_after(requested))
            .collect();
        match not_after.last() {
            Some(latest) => prop_assert_eq!(chosen.instant, **latest),
            None => prop_assert_eq!(chosen.instant, instants[0]),
        }
    }
}
