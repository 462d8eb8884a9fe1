//! Trace: a distributed-friendly issue tracker.
//!
//! Issues live in a SQLite database for querying and in one JSONL log per
//! collection for sharing through git. Every operation runs inside a
//! [`SyncEngine`] cycle that imports changed logs first and exports after.
//!
//! # Example
//!
//! ```no_run
//! use trace::{Config, EdgeKind, Store, SyncEngine};
//! use std::path::Path;
//!
//! let config = Config::load().unwrap();
//! let mut store = Store::open(&config.db_path()).unwrap();
//! let engine = SyncEngine::from_config(&config);
//!
//! let project = store.register_collection(Path::new("/work/app"), "app").unwrap();
//!
//! let synced = engine
//!     .sync(&mut store, &[project.clone()], |store| {
//!         let login = store.create(&project.id, "Implement login", 1, None, None)?;
//!         let tests = store.create(&project.id, "Write tests", 2, None, None)?;
//!         store.add_edge(&tests.id, &login.id, EdgeKind::Blocks)?;
//!         store.ready(Some(&project.id))
//!     })
//!     .unwrap();
//!
//! // Only the login work is ready; the tests wait on it.
//! assert_eq!(synced.value.len(), 1);
//! ```

mod graph;
mod storage;
mod store;
mod types;

pub mod config;
pub mod id;
pub mod jsonl;
pub mod lock;
pub mod sync;

// Re-export public API
pub use config::Config;
pub use graph::MoveOutcome;
pub use jsonl::{LogRecord, ParseWarning};
pub use lock::FileLock;
pub use store::{Clock, CloseOutcome, RepairReport, Store, StoreError, SystemClock};
pub use sync::{ExportReport, ImportReport, SyncEngine, Synced};
pub use types::{Collection, Comment, Edge, EdgeKind, Filter, Issue, Status, ValidationError};
