//! Delete, purge and tombstones

use archivum::{
    allowed_methods, DeleteMode, Graph, Method, OperationType, RepositoryError, Resource,
    ResourceId, ResourceKind, ROOT_ID,
};

use crate::common::{id, TestRepo};

fn planned(t: &TestRepo, path: &str, mode: DeleteMode) -> Vec<(ResourceId, OperationType)> {
    t.request(path, |tx| {
        let target = t.repo.resources().get_resource(Some(tx), &id(path))?;
        t.repo.deleter().plan(tx, &target, mode, None)
    })
    .unwrap()
    .into_iter()
    .map(|op| {
        let kind = op.operation_type();
        (op.resource_id, kind)
    })
    .collect()
}

fn tree(t: &TestRepo) {
    t.container("a");
    t.container("a/b");
    t.container("a/b/c");
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_leaves_tombstones() {
    let t = TestRepo::new();
    tree(&t);
    t.delete("a");

    for path in ["a", "a/b", "a/b/c"] {
        let resource = t.get(path).unwrap();
        assert!(resource.is_deleted(), "{} should be tombstoned", path);
        assert_eq!(resource.id(), &id(path));
        assert_eq!(allowed_methods(&resource), vec![Method::Delete]);
    }
    assert!(matches!(
        t.get("a/fcr:tombstone").unwrap(),
        Resource::Tombstone(_)
    ));
    let live = t.get("a").unwrap();
    assert!(matches!(
        t.repo.resources().describe(None, &live),
        Err(RepositoryError::Gone(_))
    ));

    assert!(matches!(t.remove("a", DeleteMode::Delete), Err(RepositoryError::Gone(_))));
}

#[test]
fn test_tombstone_of_live_resource_is_not_found() {
    let t = TestRepo::new();
    t.container("a");
    assert!(t.get("a/fcr:tombstone").unwrap_err().is_not_found());
}

#[test]
fn test_delete_order_is_depth_first() {
    let t = TestRepo::new();
    t.container("a");
    t.container("a/b");
    t.binary("a/b/f", "bytes");
    t.request("a", |tx| t.repo.services().create_acl(tx, &id("a"), Graph::new(), None))
        .unwrap();

    let ops = planned(&t, "a", DeleteMode::Delete);
    let ids: Vec<ResourceId> = ops.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(
        ids,
        vec![
            id("a/b/f/fcr:metadata"),
            id("a/b/f"),
            id("a/b"),
            id("a/fcr:acl"),
            id("a"),
        ]
    );
    assert!(ops.iter().all(|(_, kind)| *kind == OperationType::Delete));

    // planning stages nothing
    assert!(!t.get("a").unwrap().is_deleted());
}

#[test]
fn test_delete_skips_tombstoned_children() {
    let t = TestRepo::new();
    tree(&t);
    t.container("a/d");
    t.delete("a/b");

    let ids: Vec<ResourceId> = planned(&t, "a", DeleteMode::Delete)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![id("a/d"), id("a")]);
}

#[test]
fn test_binary_delete_tombstones_description() {
    let t = TestRepo::new();
    t.binary("b", "bytes");
    t.delete("b");

    match t.get("b/fcr:metadata").unwrap() {
        Resource::Tombstone(inner) => assert_eq!(inner.kind(), ResourceKind::Description),
        other => panic!("expected tombstone, got {:?}", other.kind()),
    }
}

#[test]
fn test_deleting_acl_clears_effective_acl() {
    let t = TestRepo::new();
    t.container("a");
    t.container("a/b");
    t.request("a", |tx| t.repo.services().create_acl(tx, &id("a"), Graph::new(), None))
        .unwrap();
    assert!(t.repo.effective_acl(&id("a/b")).unwrap().is_some());

    let before = t.repo.acl_cache().invalidation_count();
    t.delete("a/fcr:acl");
    assert!(t.repo.acl_cache().invalidation_count() > before);
    assert!(t.repo.effective_acl(&id("a/b")).unwrap().is_none());
    assert!(!t.get("a").unwrap().is_deleted());
}

#[test]
fn test_undeletable_targets() {
    let t = TestRepo::new();
    t.binary("b", "bytes");
    let m = t.version("b");

    let err = t.remove("b/fcr:metadata", DeleteMode::Delete).unwrap_err();
    assert!(matches!(err, RepositoryError::Constraint(_)));

    for target in [m.id.clone(), id("b").as_timemap(), id(ROOT_ID)] {
        let err = t
            .request("b", |tx| {
                let resource = t.repo.resources().get_resource(Some(tx), &target)?;
                t.repo.deleter().perform(tx, &resource, DeleteMode::Delete, None)
            })
            .unwrap_err();
        assert_eq!(err.status_code(), 405, "{} should not be deletable", target);
    }
}

// ============================================================================
// Purge
// ============================================================================

#[test]
fn test_purge_is_depth_first_and_complete() {
    let t = TestRepo::new();
    tree(&t);
    t.sink.clear();

    let ops = planned(&t, "a", DeleteMode::Purge);
    assert_eq!(
        ops,
        vec![
            (id("a/b/c"), OperationType::Purge),
            (id("a/b"), OperationType::Purge),
            (id("a"), OperationType::Purge),
        ]
    );

    t.purge("a");
    for path in ["a", "a/b", "a/b/c"] {
        assert!(t.get(path).unwrap_err().is_not_found(), "{} survived purge", path);
    }
    assert!(t.repo.containment().contains(None, &id("a")).is_empty());
    assert!(t.repo.containment().contains_deleted(None, &id("a")).is_empty());
    assert!(!t.repo.containment().has_children(None, &id(ROOT_ID)));

    let purged: Vec<OperationType> = t.sink.events().into_iter().map(|e| e.operation).collect();
    assert_eq!(purged, vec![OperationType::Purge; 3]);
}

#[test]
fn test_purge_after_delete_cascades_over_tombstones() {
    let t = TestRepo::new();
    tree(&t);
    t.version("a/b");
    t.delete("a");

    let err = t.remove("a/b", DeleteMode::Purge).unwrap_err();
    assert_eq!(err.status_code(), 405);

    t.request("a/fcr:tombstone", |tx| {
        let target = t
            .repo
            .resources()
            .get_resource(Some(tx), &id("a").as_tombstone())?;
        t.repo.deleter().perform(tx, &target, DeleteMode::Purge, None)
    })
    .unwrap();

    for path in ["a", "a/b", "a/b/c"] {
        assert!(t.get(path).unwrap_err().is_not_found());
    }
    assert!(t.repo.versioning().mementos(None, &id("a/b")).is_err());

    // the identifier can be reused
    t.container("a");
    assert!(t.repo.containment().contains(None, &id("a")).is_empty());
}

#[test]
fn test_purge_removes_binary_with_description() {
    let t = TestRepo::new();
    t.binary("b", "bytes");
    t.purge("b");
    assert!(t.get("b").unwrap_err().is_not_found());
    assert!(t.get("b/fcr:metadata").unwrap_err().is_not_found());
}

#[test]
fn test_purge_refused_on_archival_group_member() {
    let t = TestRepo::new();
    t.archival_group("ag");
    t.container("ag/m");

    let err = t.remove("ag/m", DeleteMode::Purge).unwrap_err();
    assert!(matches!(err, RepositoryError::MethodNotAllowed(_)));

    // deleting a member is fine, purging the root takes the whole group
    t.delete("ag/m");
    t.purge("ag");
    assert!(t.get("ag").unwrap_err().is_not_found());
    assert!(t.get("ag/m").unwrap_err().is_not_found());
}

#[test]
fn test_timemap_kept_after_delete_and_gone_after_purge() {
    let t = TestRepo::new();
    t.container("a");
    t.version("a");

    t.delete("a");
    assert!(matches!(t.get("a/fcr:versions").unwrap(), Resource::TimeMap(_)));
    assert_eq!(t.repo.versioning().mementos(None, &id("a")).unwrap().len(), 1);

    t.request("a/fcr:tombstone", |tx| {
        let target = t.repo.resources().get_resource(Some(tx), &id("a").as_tombstone())?;
        t.repo.deleter().perform(tx, &target, DeleteMode::Purge, None)
    })
    .unwrap();
    assert!(t.get("a/fcr:versions").unwrap_err().is_not_found());
    assert!(t.repo.versioning().mementos(None, &id("a")).unwrap_err().is_not_found());
}
