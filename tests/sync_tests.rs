//! Integration tests for log synchronization.
//!
//! A second store opened on another database plays the part of a second
//! machine sharing the same collection directory through git.

mod common;

use common::TestEnv;
use std::time::Duration;
use trace::sync::{fingerprint, marker_key};
use trace::{EdgeKind, Status, Store, StoreError, SyncEngine};

/// A store and engine with their own home, as on another machine.
fn second_machine(env: &TestEnv) -> (Store, SyncEngine) {
    let home = env.temp_dir.path().join("home2");
    let store = Store::open(&home.join("trace.db")).unwrap();
    let engine = SyncEngine::new(home.join(".lock"), Duration::from_secs(2));
    (store, engine)
}

fn edge_pairs(store: &Store, id: &str) -> Vec<(String, EdgeKind)> {
    store
        .outgoing_edges(id)
        .unwrap()
        .into_iter()
        .map(|e| (e.to_id, e.kind))
        .collect()
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_round_trip_to_second_machine() {
    let mut env = TestEnv::new();

    let epic = env.create_issue("Epic");
    let step = env.create_child("Step", &epic);
    let gate = env.store
        .create(&env.collection.id, "Gate", 1, Some("multi\nline"), None)
        .unwrap();
    env.add_blocking_dep(&step, &gate);
    env.store.add_comment(&step.id, "looks good", "reviewer").unwrap();
    let done = env.create_issue("Done");
    env.close_issue(&done);

    let synced = env.sync();
    assert_eq!(synced.exports.len(), 1);
    assert!(synced.exports[0].written);
    assert_eq!(synced.exports[0].records, 4);

    let (mut remote, engine) = second_machine(&env);
    let synced = engine
        .sync(&mut remote, &[env.collection.clone()], |_| Ok(()))
        .unwrap();
    assert_eq!(synced.imports.len(), 1);
    assert_eq!(synced.imports[0].created, 4);
    assert!(synced.imports[0].warnings.is_empty());
    // Re-exporting the imported data reproduces the same bytes.
    assert!(!synced.exports[0].written);

    for issue in [&epic, &step, &gate, &done] {
        let local = env.store.require(&issue.id).unwrap();
        let imported = remote.require(&issue.id).unwrap();
        assert_eq!(imported, local);
        assert_eq!(edge_pairs(&remote, &issue.id), edge_pairs(&env.store, &issue.id));
    }

    let comments = remote.comments(&step.id).unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].source, "reviewer");

    let ready: Vec<_> = remote.ready(None).unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(ready, env.ready_ids());
}

#[test]
fn test_log_is_sorted_one_record_per_line() {
    let mut env = TestEnv::new();
    for i in 0..5 {
        env.create_issue(&format!("Task {}", i));
    }
    env.sync();

    let text = env.read_log();
    assert!(text.ends_with('\n'));
    let ids: Vec<String> = text
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("collection_id").is_none());
            value["id"].as_str().unwrap().to_string()
        })
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
    assert_eq!(ids.len(), 5);
}

// =============================================================================
// Staleness and Idempotence
// =============================================================================

#[test]
fn test_second_sync_performs_no_writes() {
    let mut env = TestEnv::new();
    env.create_issue("Task");
    env.sync();

    let before = std::fs::metadata(env.log_path()).unwrap().modified().unwrap();
    let marker = env.store.meta(&marker_key(&env.collection.id)).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let synced = env.sync();
    assert!(synced.imports.is_empty());
    assert!(!synced.exports[0].written);

    let after = std::fs::metadata(env.log_path()).unwrap().modified().unwrap();
    assert_eq!(before, after);
    assert_eq!(env.store.meta(&marker_key(&env.collection.id)).unwrap(), marker);
}

#[test]
fn test_marker_tracks_log_fingerprint() {
    let mut env = TestEnv::new();
    env.create_issue("Task");
    env.sync();

    let bytes = std::fs::read(env.log_path()).unwrap();
    assert_eq!(
        env.store.meta(&marker_key(&env.collection.id)).unwrap(),
        Some(fingerprint(&bytes))
    );
}

#[test]
fn test_remote_edit_is_imported() {
    let mut env = TestEnv::new();
    let issue = env.create_issue("Original");
    env.sync();

    let (mut remote, engine) = second_machine(&env);
    let collections = [env.collection.clone()];
    engine
        .sync(&mut remote, &collections, |store| {
            store.update(&issue.id, Some("Edited remotely"), None, Some(0))
        })
        .unwrap();

    let synced = env.sync();
    assert_eq!(synced.imports.len(), 1);
    assert_eq!(synced.imports[0].updated, 1);
    assert_eq!(synced.imports[0].created, 0);

    let local = env.store.require(&issue.id).unwrap();
    assert_eq!(local.title, "Edited remotely");
    assert_eq!(local.priority, 0);
}

#[test]
fn test_local_records_missing_from_log_survive_import() {
    let mut env = TestEnv::new();
    let shared = env.create_issue("Shared");
    env.sync();

    // Created without a sync: not yet in the log.
    let local = env.create_issue("Local draft");

    // Someone else rewrites the log.
    let (mut remote, engine) = second_machine(&env);
    let collections = [env.collection.clone()];
    engine
        .sync(&mut remote, &collections, |store| store.set_status(&shared.id, Status::InProgress))
        .unwrap();

    let synced = env.sync();
    assert_eq!(synced.imports.len(), 1);
    assert!(env.store.get(&local.id).unwrap().is_some());
    assert_eq!(env.store.require(&shared.id).unwrap().status, Status::InProgress);
    // ...and the next export carries both.
    assert!(env.read_log().contains(&local.id));
}

// =============================================================================
// Tolerant Import
// =============================================================================

#[test]
fn test_bad_lines_become_warnings() {
    let mut env = TestEnv::new();
    let good = r#"{"id":"proj-aaaaaa","title":"Good","status":"open","priority":2,"created_at":"2024-01-15T10:30:00.000000Z","updated_at":"2024-01-15T10:30:00.000000Z","dependencies":[],"comments":[]}"#;
    let text = format!("{{broken\n{}\n{{\"id\":\"proj-bbbbbb\"}}\n", good);
    std::fs::create_dir_all(env.collection.trace_dir()).unwrap();
    std::fs::write(env.log_path(), text).unwrap();

    let synced = env.sync();
    let report = &synced.imports[0];
    assert_eq!(report.created, 1);
    let lines: Vec<usize> = report.warnings.iter().map(|w| w.line).collect();
    assert_eq!(lines, vec![1, 3]);

    // The rewritten log only holds the good record.
    assert!(synced.exports[0].written);
    assert_eq!(env.read_log(), format!("{}\n", good));
}

#[test]
fn test_unknown_fields_survive_round_trip() {
    let mut env = TestEnv::new();
    let line = r#"{"id":"proj-aaaaaa","title":"From the future","status":"open","priority":2,"created_at":"2024-01-15T10:30:00.000000Z","updated_at":"2024-01-15T10:30:00.000000Z","dependencies":[],"comments":[],"estimate":5,"labels":["ui"]}"#;
    std::fs::create_dir_all(env.collection.trace_dir()).unwrap();
    std::fs::write(env.log_path(), format!("{}\n", line)).unwrap();

    env.sync();
    let issue = env.store.require("proj-aaaaaa").unwrap();
    assert_eq!(issue.extra.get("estimate"), Some(&serde_json::json!(5)));

    // An unrelated mutation forces a re-export.
    env.create_issue("Other");
    let synced = env.sync();
    assert!(synced.exports[0].written);
    assert!(env.read_log().lines().any(|l| l == line));
}

#[test]
fn test_foreign_prefix_skipped_on_import_and_export() {
    let mut env = TestEnv::new();
    let text = concat!(
        r#"{"id":"other-aaaaaa","title":"Not ours","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z"}"#,
        "\n",
        r#"{"id":"proj-aaaaaa","title":"Ours","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z"}"#,
        "\n",
        r#"{"id":"proj-extra-aaaaaa","title":"Near miss","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z"}"#,
        "\n",
    );
    std::fs::create_dir_all(env.collection.trace_dir()).unwrap();
    std::fs::write(env.log_path(), text).unwrap();

    let synced = env.sync();
    assert_eq!(synced.imports[0].skipped, 2);
    assert_eq!(synced.imports[0].created, 1);
    assert!(env.store.get("other-aaaaaa").unwrap().is_none());
    assert_eq!(synced.exports[0].records, 1);
    assert!(!env.read_log().contains("other-aaaaaa"));
}

#[test]
fn test_log_without_matching_ids_is_not_overwritten() {
    let mut env = TestEnv::new();
    let local = env.create_issue("Local");
    let text = concat!(
        r#"{"id":"other-aaaaaa","title":"Not ours","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z"}"#,
        "\n",
    );
    std::fs::create_dir_all(env.collection.trace_dir()).unwrap();
    std::fs::write(env.log_path(), text).unwrap();

    let collections = [env.collection.clone()];
    let err = env.engine.sync(&mut env.store, &collections, |_| Ok(())).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::PrefixMismatch { .. })
    ));
    assert_eq!(env.read_log(), text);
    assert!(env.store.get(&local.id).unwrap().is_some());
}

#[test]
fn test_legacy_dependency_key_imported() {
    let mut env = TestEnv::new();
    let text = concat!(
        r#"{"id":"proj-aaaaaa","title":"Parent","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z"}"#,
        "\n",
        r#"{"id":"proj-bbbbbb","title":"Child","status":"open","priority":2,"created_at":"2024-01-15T10:30:00Z","updated_at":"2024-01-15T10:30:00Z","dependencies":[{"depends_on_id":"proj-aaaaaa","type":"parent"}]}"#,
        "\n",
    );
    std::fs::create_dir_all(env.collection.trace_dir()).unwrap();
    std::fs::write(env.log_path(), text).unwrap();

    env.sync();
    assert_eq!(env.store.parent("proj-bbbbbb").unwrap(), Some("proj-aaaaaa".to_string()));
    // Exported under the current key.
    assert!(env.read_log().contains(r#""to_id":"proj-aaaaaa""#));
}

#[test]
fn test_inverted_hierarchy_imported_regardless_of_line_order() {
    let mut env = TestEnv::new();
    let a = env.create_issue("A");
    let b = env.create_child("B", &a);
    env.sync();

    // Elsewhere, A becomes B's child and B loses its parent.
    let (mut remote, engine) = second_machine(&env);
    let collections = [env.collection.clone()];
    engine
        .sync(&mut remote, &collections, |store| {
            store.reparent(&b.id, None)?;
            store.reparent(&a.id, Some(&b.id))
        })
        .unwrap();

    let synced = env.sync();
    assert!(synced.imports[0].warnings.is_empty(), "{:?}", synced.imports[0].warnings);
    assert_eq!(env.store.parent(&a.id).unwrap(), Some(b.id.clone()));
    assert_eq!(env.store.parent(&b.id).unwrap(), None);
    assert!(!synced.exports[0].written);
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_renaming_collection_keeps_log_contents() {
    let mut env = TestEnv::new();
    let issue = env.create_issue("Task");
    env.sync();

    let renamed = env
        .store
        .register_collection(&env.temp_dir.path().join("proj"), "Renamed")
        .unwrap();
    assert_eq!(renamed.prefix, "proj");

    let synced = env.sync();
    assert_eq!(synced.exports[0].records, 1);
    assert!(env.read_log().contains(&issue.id));
}

#[test]
fn test_checkout_under_other_name_adopts_log_prefix() {
    let mut env = TestEnv::new();
    let issue = env.create_issue("Shared");
    env.sync();
    let before = env.read_log();

    let (mut remote, engine) = second_machine(&env);
    let checkout = remote
        .register_collection(&env.temp_dir.path().join("proj"), "checkout")
        .unwrap();
    let synced = engine
        .sync(&mut remote, &[checkout.clone()], |store| {
            store.create(&checkout.id, "Added remotely", 2, None, None)
        })
        .unwrap();

    assert_eq!(synced.imports[0].created, 1);
    assert_eq!(synced.imports[0].skipped, 0);
    assert!(synced.value.id.starts_with("proj-"));
    assert_eq!(remote.require(&issue.id).unwrap().title, "Shared");

    let after = env.read_log();
    assert_eq!(after.lines().count(), 2);
    assert!(after.contains(before.trim_end()));
}

// =============================================================================
// Operation Failures
// =============================================================================

#[test]
fn test_failed_operation_leaves_log_untouched() {
    let mut env = TestEnv::new();
    env.create_issue("Task");
    env.sync();
    let before = env.read_log();

    let collections = [env.collection.clone()];
    let result = env.engine.sync(&mut env.store, &collections, |store| {
        store.create(&collections[0].id, "Half done", 2, None, None)?;
        store.close("proj-zzzzzz", false)
    });
    assert!(result.is_err());
    assert_eq!(env.read_log(), before);

    // The lock was released with the error.
    env.sync();
}

// =============================================================================
// Multi-collection
// =============================================================================

#[test]
fn test_move_exports_both_collections() {
    let mut env = TestEnv::new();
    let target = env.add_collection("target", "target");
    let issue = env.create_issue("Traveller");
    env.sync();
    assert!(env.read_log().contains(&issue.id));

    let collections = [env.collection.clone(), target.clone()];
    let synced = env
        .engine
        .sync(&mut env.store, &collections, |store| store.move_issue(&issue.id, &target.id, false))
        .unwrap();
    let new_id = synced.value.new_id(&issue.id).unwrap().to_string();

    assert_eq!(synced.exports.len(), 2);
    assert!(!env.read_log().contains(&issue.id));
    let target_log = std::fs::read_to_string(target.log_path()).unwrap();
    assert!(target_log.contains(&new_id));
}

#[test]
fn test_duplicate_collections_synced_once() {
    let mut env = TestEnv::new();
    env.create_issue("Task");

    let collections = [env.collection.clone(), env.collection.clone()];
    let synced = env.engine.sync(&mut env.store, &collections, |_| Ok(())).unwrap();
    assert_eq!(synced.exports.len(), 1);
}
