//! Integration tests for graph operations.
//!
//! Tests dependency management, cycle detection, ready work calculation and
//! moving issues between collections.

mod common;

use common::TestEnv;
use std::collections::HashSet;
use trace::{EdgeKind, Status, StoreError};

fn id_set<'a>(ids: impl IntoIterator<Item = &'a String>) -> HashSet<String> {
    ids.into_iter().cloned().collect()
}

// =============================================================================
// Ready Work Calculation Tests
// =============================================================================

#[test]
fn test_ready_empty_store() {
    let env = TestEnv::new();
    assert!(env.store.ready(None).unwrap().is_empty());
}

#[test]
fn test_ready_multiple_independent_issues() {
    let mut env = TestEnv::new();
    let a = env.create_issue("Task 1");
    let b = env.create_issue("Task 2");
    let c = env.create_issue("Task 3");

    env.assert_ready(&a);
    env.assert_ready(&b);
    env.assert_ready(&c);
    assert_eq!(env.ready_count(), 3);
}

#[test]
fn test_ready_after_closing_blocker() {
    let mut env = TestEnv::new();

    let blocker = env.create_issue("Blocker");
    let blocked = env.create_issue("Blocked");
    env.add_blocking_dep(&blocked, &blocker);

    env.assert_ready(&blocker);
    env.assert_not_ready(&blocked);
    env.assert_blocked(&blocked);

    env.close_issue(&blocker);

    env.assert_ready(&blocked);
}

#[test]
fn test_ready_chain_releases_one_step_at_a_time() {
    let mut env = TestEnv::new();

    // A waits on B, B waits on C
    let a = env.create_issue("A");
    let b = env.create_issue("B");
    let c = env.create_issue("C");
    env.add_blocking_dep(&a, &b);
    env.add_blocking_dep(&b, &c);

    assert_eq!(env.ready_ids(), vec![c.id.clone()]);

    env.close_issue(&c);
    assert_eq!(env.ready_ids(), vec![b.id.clone()]);

    env.close_issue(&b);
    assert_eq!(env.ready_ids(), vec![a.id.clone()]);
}

#[test]
fn test_ready_scenario_parent_and_blocker() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_child("B", &a);
    let c = env.create_issue("C");
    env.add_blocking_dep(&c, &b);

    assert_eq!(
        id_set(&env.ready_ids()),
        HashSet::from([a.id.clone(), b.id.clone()])
    );
    assert!(env.store.is_blocked(&c.id).unwrap());
}

#[test]
fn test_blocking_propagates_down_to_children() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_child("B", &a);
    let grandchild = env.create_child("B.1", &b);
    let gate = env.create_issue("Gate");
    env.add_blocking_dep(&a, &gate);

    env.assert_not_ready(&a);
    env.assert_not_ready(&b);
    env.assert_not_ready(&grandchild);
    env.assert_blocked(&grandchild);
    env.assert_ready(&gate);

    env.close_issue(&gate);
    env.assert_ready(&grandchild);
}

#[test]
fn test_blocked_child_does_not_block_parent() {
    let mut env = TestEnv::new();

    let parent = env.create_issue("Parent");
    let child = env.create_child("Child", &parent);
    let gate = env.create_issue("Gate");
    env.add_blocking_dep(&child, &gate);

    env.assert_not_ready(&child);
    env.assert_ready(&parent);
}

#[test]
fn test_ready_excludes_closed_and_blocked_status() {
    let mut env = TestEnv::new();

    let open = env.create_issue("Open");
    let started = env.create_issue("Started");
    let marked = env.create_issue("Marked blocked");
    let done = env.create_issue("Done");

    env.store.set_status(&started.id, Status::InProgress).unwrap();
    env.store.set_status(&marked.id, Status::Blocked).unwrap();
    env.close_issue(&done);

    assert_eq!(
        id_set(&env.ready_ids()),
        HashSet::from([open.id.clone(), started.id.clone()])
    );
    env.assert_blocked(&marked);
}

#[test]
fn test_ready_ordering_priority_then_age() {
    let mut env = TestEnv::new();

    let low = env.create_issue_with_priority("Low", 4);
    let critical = env.create_issue_with_priority("Critical", 0);
    let medium = env.create_issue_with_priority("Medium", 2);

    assert_eq!(env.ready_ids(), vec![critical.id, medium.id, low.id]);
}

#[test]
fn test_related_edges_never_block() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_issue("B");
    env.store.add_edge(&a.id, &b.id, EdgeKind::Related).unwrap();

    assert_eq!(env.ready_count(), 2);
}

#[test]
fn test_ready_scoped_to_collection() {
    let mut env = TestEnv::new();
    let other = env.add_collection("other", "other");

    let mine = env.create_issue("Mine");
    let theirs = env.store.create(&other.id, "Theirs", 2, None, None).unwrap();

    let scoped: Vec<_> = env
        .store
        .ready(Some(&env.collection.id))
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(scoped, vec![mine.id.clone()]);
    assert_eq!(id_set(&env.ready_ids()), HashSet::from([mine.id, theirs.id]));
}

#[test]
fn test_cross_collection_blocker() {
    let mut env = TestEnv::new();
    let other = env.add_collection("other", "other");

    let mine = env.create_issue("Mine");
    let theirs = env.store.create(&other.id, "Theirs", 2, None, None).unwrap();
    env.add_blocking_dep(&mine, &theirs);

    env.assert_not_ready(&mine);
    env.close_issue(&theirs);
    env.assert_ready(&mine);
}

// =============================================================================
// Cycle Detection Tests
// =============================================================================

#[test]
fn test_parent_cycle_direct() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_child("B", &a);

    let err = env.store.add_edge(&a.id, &b.id, EdgeKind::Parent).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Cycle { .. })
    ));
}

#[test]
fn test_parent_cycle_long_chain() {
    let mut env = TestEnv::new();

    let root = env.create_issue("Root");
    let mut tail = root.clone();
    for i in 0..5 {
        tail = env.create_child(&format!("Level {}", i), &tail);
    }

    let err = env.store.reparent(&root.id, Some(&tail.id)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Cycle { .. })
    ));
    assert_eq!(env.store.parent(&root.id).unwrap(), None);
    assert_eq!(env.store.ancestors(&tail.id).unwrap().len(), 5);
}

#[test]
fn test_reparent_moves_subtree_along() {
    let mut env = TestEnv::new();

    let old_root = env.create_issue("Old root");
    let new_root = env.create_issue("New root");
    let mid = env.create_child("Mid", &old_root);
    let leaf = env.create_child("Leaf", &mid);

    env.store.reparent(&mid.id, Some(&new_root.id)).unwrap();

    assert_eq!(
        env.store.ancestors(&leaf.id).unwrap(),
        vec![mid.id.clone(), new_root.id.clone()]
    );
    assert!(env.store.children(&old_root.id).unwrap().is_empty());
}

#[test]
fn test_blocks_cycle_allowed() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_issue("B");
    let c = env.create_issue("C");
    env.add_blocking_dep(&a, &b);
    env.add_blocking_dep(&b, &c);
    env.add_blocking_dep(&c, &a);

    assert_eq!(env.ready_count(), 0);
}

#[test]
fn test_edge_idempotent() {
    let mut env = TestEnv::new();

    let a = env.create_issue("A");
    let b = env.create_issue("B");

    let first = env.add_blocking_dep(&a, &b);
    let second = env.add_blocking_dep(&a, &b);

    assert_eq!(first, second);
    assert_eq!(env.store.outgoing_edges(&a.id).unwrap().len(), 1);
}

#[test]
fn test_incoming_and_outgoing_edges() {
    let mut env = TestEnv::new();

    let parent = env.create_issue("Parent");
    let child = env.create_child("Child", &parent);
    let blocker = env.create_issue("Blocker");
    env.add_blocking_dep(&child, &blocker);

    let outgoing = env.store.outgoing_edges(&child.id).unwrap();
    let kinds: Vec<_> = outgoing.iter().map(|e| e.kind).collect();
    assert_eq!(outgoing.len(), 2);
    assert!(kinds.contains(&EdgeKind::Parent));
    assert!(kinds.contains(&EdgeKind::Blocks));

    let incoming = env.store.incoming_edges(&parent.id).unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from_id, child.id);

    let blockers = env.store.blockers(&child.id).unwrap();
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].id, blocker.id);
}

// =============================================================================
// Move Tests
// =============================================================================

#[test]
fn test_move_single_issue_rewrites_references() {
    let mut env = TestEnv::new();
    let target = env.add_collection("target", "target");

    let parent = env.create_issue("Parent");
    let moving = env.create_child("Moving", &parent);
    let waiter = env.create_issue("Waiter");
    env.add_blocking_dep(&waiter, &moving);
    env.store.add_comment(&moving.id, "context", "user").unwrap();

    let outcome = env.store.move_issue(&moving.id, &target.id, false).unwrap();
    assert_eq!(outcome.renamed.len(), 1);
    let new_id = outcome.new_id(&moving.id).unwrap().to_string();
    assert!(new_id.starts_with("target-"));

    assert!(env.store.get(&moving.id).unwrap().is_none());
    let moved = env.store.require(&new_id).unwrap();
    assert_eq!(moved.collection_id, target.id);
    assert_eq!(moved.title, "Moving");

    // Outgoing parent edge followed the rename
    assert_eq!(env.store.parent(&new_id).unwrap(), Some(parent.id.clone()));
    // Incoming blocks edge was rewritten
    let blockers: Vec<_> = env
        .store
        .blockers(&waiter.id)
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(blockers, vec![new_id.clone()]);
    // Comments came along
    assert_eq!(env.store.comments(&new_id).unwrap().len(), 1);
    assert!(env.store.comments(&moving.id).unwrap().is_empty());
}

#[test]
fn test_move_with_children() {
    let mut env = TestEnv::new();
    let target = env.add_collection("target", "target");

    let root = env.create_issue("Root");
    let child = env.create_child("Child", &root);
    let grandchild = env.create_child("Grandchild", &child);
    let bystander = env.create_issue("Bystander");

    let outcome = env.store.move_issue(&root.id, &target.id, true).unwrap();
    assert_eq!(outcome.renamed.len(), 3);
    assert_eq!(outcome.renamed[0].0, root.id);

    let new_root = outcome.new_id(&root.id).unwrap();
    let new_child = outcome.new_id(&child.id).unwrap();
    let new_grandchild = outcome.new_id(&grandchild.id).unwrap();

    assert_eq!(env.store.parent(new_child).unwrap().as_deref(), Some(new_root));
    assert_eq!(env.store.parent(new_grandchild).unwrap().as_deref(), Some(new_child));
    for (_, new) in &outcome.renamed {
        assert_eq!(env.store.require(new).unwrap().collection_id, target.id);
    }

    let bystander = env.store.require(&bystander.id).unwrap();
    assert_eq!(bystander.collection_id, env.collection.id);
}

#[test]
fn test_move_without_children_leaves_them_in_place() {
    let mut env = TestEnv::new();
    let target = env.add_collection("target", "target");

    let root = env.create_issue("Root");
    let child = env.create_child("Child", &root);

    let outcome = env.store.move_issue(&root.id, &target.id, false).unwrap();
    let new_root = outcome.new_id(&root.id).unwrap();

    let child = env.store.require(&child.id).unwrap();
    assert_eq!(child.collection_id, env.collection.id);
    assert_eq!(env.store.parent(&child.id).unwrap().as_deref(), Some(new_root));
}

#[test]
fn test_move_to_unknown_collection_changes_nothing() {
    let mut env = TestEnv::new();

    let issue = env.create_issue("Stay");
    let err = env.store.move_issue(&issue.id, "/nowhere", false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::CollectionNotFound(_))
    ));
    assert!(env.store.get(&issue.id).unwrap().is_some());
}

#[test]
fn test_move_failing_midway_rolls_back_every_rename() {
    let mut env = TestEnv::new();
    let target = env.add_collection("target", "target");

    let root = env.create_issue("Root");
    let child = env.create_child("Child", &root);
    let grandchild = env.create_child("Grandchild", &child);
    let waiter = env.create_issue("Waiter");
    env.add_blocking_dep(&waiter, &root);
    env.store.add_comment(&root.id, "note", "user").unwrap();

    // Fail the second rename, after the root's has already been applied.
    let db = rusqlite::Connection::open(env.home().join("trace.db")).unwrap();
    db.execute_batch(
        "CREATE TRIGGER fail_child_rename BEFORE UPDATE OF id ON issues
         WHEN OLD.title = 'Child'
         BEGIN SELECT RAISE(ABORT, 'rename refused'); END;",
    )
    .unwrap();

    let err = env.store.move_issue(&root.id, &target.id, true).unwrap_err();
    assert!(format!("{:#}", err).contains("rename refused"));

    for issue in [&root, &child, &grandchild] {
        let unchanged = env.store.require(&issue.id).unwrap();
        assert_eq!(unchanged.collection_id, env.collection.id);
    }
    assert_eq!(env.store.parent(&child.id).unwrap(), Some(root.id.clone()));
    assert_eq!(env.store.parent(&grandchild.id).unwrap(), Some(child.id.clone()));
    let blockers: Vec<String> = env.store.blockers(&waiter.id).unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(blockers, vec![root.id.clone()]);
    assert_eq!(env.store.comments(&root.id).unwrap().len(), 1);
    assert!(env
        .store
        .list(&trace::Filter::new().collection(target.id.as_str()))
        .unwrap()
        .is_empty());
}
