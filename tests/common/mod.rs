//! Shared test infrastructure for trace integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use trace::{Collection, Edge, EdgeKind, Issue, Store, SyncEngine};

/// Test environment with automatic cleanup.
///
/// Holds an on-disk store under `home/`, a sync engine locking `home/.lock`,
/// and one registered collection rooted at `proj/`.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
    pub engine: SyncEngine,
    pub collection: Collection,
}

impl TestEnv {
    /// Create a new test environment with a registered "proj" collection.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let home = temp_dir.path().join("home");
        let mut store = Store::open(&home.join("trace.db")).expect("Failed to open store");
        let engine = SyncEngine::new(home.join(".lock"), Duration::from_secs(2));
        let collection = store
            .register_collection(&temp_dir.path().join("proj"), "proj")
            .expect("Failed to register collection");
        Self {
            temp_dir,
            store,
            engine,
            collection,
        }
    }

    pub fn home(&self) -> PathBuf {
        self.temp_dir.path().join("home")
    }

    /// Open a second store on the same database, as another process would.
    pub fn reopen(&self) -> Store {
        Store::open(&self.home().join("trace.db")).expect("Failed to reopen store")
    }

    /// Register another collection under the temp dir.
    pub fn add_collection(&mut self, dir: &str, name: &str) -> Collection {
        self.store
            .register_collection(&self.temp_dir.path().join(dir), name)
            .expect("Failed to register collection")
    }

    /// Create an issue with default priority.
    pub fn create_issue(&mut self, title: &str) -> Issue {
        self.create_issue_with_priority(title, 2)
    }

    /// Create an issue with specified priority.
    pub fn create_issue_with_priority(&mut self, title: &str, priority: u8) -> Issue {
        self.store
            .create(&self.collection.id, title, priority, None, None)
            .expect("Failed to create issue")
    }

    /// Create a child of `parent`.
    pub fn create_child(&mut self, title: &str, parent: &Issue) -> Issue {
        self.store
            .create(&self.collection.id, title, 2, None, Some(&parent.id))
            .expect("Failed to create child")
    }

    /// Add a blocking dependency (`blocked` waits on `blocker`).
    pub fn add_blocking_dep(&mut self, blocked: &Issue, blocker: &Issue) -> Edge {
        self.store
            .add_edge(&blocked.id, &blocker.id, EdgeKind::Blocks)
            .expect("Failed to add edge")
    }

    /// Close an issue.
    pub fn close_issue(&mut self, issue: &Issue) -> Issue {
        self.store.close(&issue.id, false).expect("Failed to close issue").issue
    }

    /// Run one sync over the main collection with a no-op operation.
    pub fn sync(&mut self) -> trace::Synced<()> {
        let collections = [self.collection.clone()];
        self.engine
            .sync(&mut self.store, &collections, |_| Ok(()))
            .expect("Failed to sync")
    }

    pub fn log_path(&self) -> PathBuf {
        self.collection.log_path()
    }

    pub fn read_log(&self) -> String {
        std::fs::read_to_string(self.log_path()).expect("Failed to read log")
    }

    /// Ids of ready issues.
    pub fn ready_ids(&self) -> Vec<String> {
        self.store
            .ready(None)
            .expect("Failed to get ready issues")
            .into_iter()
            .map(|i| i.id)
            .collect()
    }

    /// Assert that an issue is in the ready list.
    pub fn assert_ready(&self, issue: &Issue) {
        let ready = self.ready_ids();
        assert!(
            ready.contains(&issue.id),
            "Expected issue {} to be ready, but it wasn't. Ready issues: {:?}",
            issue.id,
            ready
        );
    }

    /// Assert that an issue is NOT in the ready list.
    pub fn assert_not_ready(&self, issue: &Issue) {
        let ready = self.ready_ids();
        assert!(
            !ready.contains(&issue.id),
            "Expected issue {} to NOT be ready, but it was",
            issue.id
        );
    }

    /// Assert that an issue is in the blocked list.
    pub fn assert_blocked(&self, issue: &Issue) {
        let blocked = self.store.blocked(None).expect("Failed to get blocked issues");
        assert!(
            blocked.iter().any(|i| i.id == issue.id),
            "Expected issue {} to be blocked, but it wasn't",
            issue.id
        );
    }

    /// Get ready issues count.
    pub fn ready_count(&self) -> usize {
        self.ready_ids().len()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
