//! Keeps the SQLite store and each collection's text log in step.
//!
//! Every operation runs as lock, import stale logs, run, export. A log is
//! stale when the SHA-256 of its bytes differs from the fingerprint recorded
//! for the collection at the last import or export.

use crate::config::Config;
use crate::id::{belongs_to_prefix, prefix_of};
use crate::jsonl::{self, LogRecord, ParseWarning};
use crate::lock::FileLock;
use crate::storage::Storage;
use crate::store::{Store, StoreError};
use crate::types::{Collection, EdgeKind};
use eyre::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MARKER_PREFIX: &str = "last_sync:";

/// Metadata key holding a collection's last-sync fingerprint.
pub fn marker_key(collection_id: &str) -> String {
    format!("{}{}", MARKER_PREFIX, collection_id)
}

/// Hex SHA-256 of log content.
pub fn fingerprint(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// What importing one collection's log did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub collection_id: String,
    pub created: usize,
    pub updated: usize,
    /// Records whose id does not carry the collection prefix
    pub skipped: usize,
    pub warnings: Vec<ParseWarning>,
}

/// What exporting one collection's log did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    pub collection_id: String,
    pub records: usize,
    /// Store issues left out because their id does not carry the prefix
    pub skipped: usize,
    /// False when the log already held exactly these bytes
    pub written: bool,
}

/// An operation's value plus the sync work done around it.
#[derive(Debug)]
pub struct Synced<T> {
    pub value: T,
    pub imports: Vec<ImportReport>,
    pub exports: Vec<ExportReport>,
}

/// Runs store operations inside the locked import/export cycle.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SyncEngine {
    pub fn new(lock_path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            lock_path: lock_path.into(),
            lock_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.lock_path(), config.lock_timeout())
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run `op` with every collection in `collections` synchronized.
    ///
    /// Stale logs are imported before `op`; after it succeeds every
    /// registered collection is exported. If `op` fails nothing is exported
    /// and its error is returned once the lock is released.
    pub fn sync<T, F>(&self, store: &mut Store, collections: &[Collection], op: F) -> Result<Synced<T>>
    where
        F: FnOnce(&mut Store) -> Result<T>,
    {
        let _lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;

        let mut seen = HashSet::new();
        let collections: Vec<&Collection> = collections.iter().filter(|c| seen.insert(c.id.clone())).collect();

        let mut imports = Vec::new();
        for collection in &collections {
            if let Some(report) = import_if_stale(store, collection)? {
                imports.push(report);
            }
        }

        let value = op(store)?;

        let mut exports = Vec::new();
        for collection in &collections {
            // The operation may have renamed or re-registered it.
            match store.get_collection(&collection.id)? {
                Some(current) => exports.push(export_collection(store, &current)?),
                None => log::debug!("skipping export of unregistered collection {}", collection.id),
            }
        }

        Ok(Synced { value, imports, exports })
    }
}

/// Import `collection`'s log if it exists and has changed since the last sync.
pub fn import_if_stale(store: &mut Store, collection: &Collection) -> Result<Option<ImportReport>> {
    let path = collection.log_path();
    if !path.exists() {
        log::debug!("no log for {}", collection.id);
        return Ok(None);
    }

    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let current = fingerprint(&bytes);
    if store.storage.get_meta(&marker_key(&collection.id))?.as_deref() == Some(current.as_str()) {
        log::debug!("log for {} is up to date", collection.id);
        return Ok(None);
    }

    import_log(store, collection, &bytes).map(Some)
}

/// Import log bytes into the store in one transaction.
///
/// Records are upserted; their outgoing edges and comments are replaced.
/// Store records missing from the log are left alone. Edges are inserted
/// only after every record's old edges are gone, so checks see the log's
/// hierarchy; edges that would break the parent forest are dropped with a
/// warning.
pub fn import_log(store: &mut Store, collection: &Collection, bytes: &[u8]) -> Result<ImportReport> {
    let (entries, mut warnings) = jsonl::decode_lines(bytes);
    let mut report = ImportReport {
        collection_id: collection.id.clone(),
        ..Default::default()
    };

    let storage = &store.storage;
    let tx = storage.transaction()?;
    storage.upsert_collection(collection)?;
    let prefix = import_prefix(storage, collection, &entries)?;

    // Later duplicates win.
    let last_line: HashMap<&str, usize> = entries.iter().map(|(line, r)| (r.id.as_str(), *line)).collect();

    let mut imported = Vec::new();
    for (line, record) in &entries {
        if !belongs_to_prefix(&record.id, &prefix) {
            log::debug!("skipping {} in {}: foreign prefix", record.id, collection.id);
            report.skipped += 1;
            continue;
        }
        if last_line.get(record.id.as_str()) != Some(line) {
            continue;
        }

        let issue = record.to_issue(&collection.id);
        match storage.get_issue(&issue.id)? {
            None => {
                storage.insert_issue(&issue)?;
                report.created += 1;
            }
            Some(existing) => {
                if existing != issue {
                    report.updated += 1;
                }
                storage.update_issue(&issue)?;
            }
        }

        storage.delete_edges_from(&record.id)?;
        storage.delete_comments(&record.id)?;
        for comment in record.to_comments() {
            storage.insert_comment(&comment)?;
        }
        imported.push((*line, record));
    }

    for (line, record) in imported {
        let mut inserted = HashSet::new();
        let mut has_parent = false;
        for edge in record.to_edges() {
            let problem = if edge.to_id == edge.from_id {
                Some("self-referential edge")
            } else if !inserted.insert((edge.to_id.clone(), edge.kind)) {
                None
            } else if edge.kind == EdgeKind::Parent && has_parent {
                Some("second parent")
            } else if edge.kind == EdgeKind::Parent && storage.is_ancestor(&edge.from_id, &edge.to_id)? {
                Some("parent cycle")
            } else {
                storage.insert_edge(&edge)?;
                has_parent |= edge.kind == EdgeKind::Parent;
                None
            };

            if let Some(problem) = problem {
                let warning = ParseWarning {
                    line,
                    message: format!("dropped {} edge {} -> {}: {}", edge.kind, edge.from_id, edge.to_id, problem),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
            }
        }
    }

    storage.set_meta(&marker_key(&collection.id), &fingerprint(bytes))?;
    tx.commit().context("Failed to commit import")?;

    warnings.sort_by_key(|w| w.line);
    report.warnings = warnings;
    log::info!(
        "imported {}: {} created, {} updated, {} skipped, {} warnings",
        collection.id,
        report.created,
        report.updated,
        report.skipped,
        report.warnings.len()
    );
    Ok(report)
}

/// The prefix a log is imported under.
///
/// Normally the collection's own. A collection that owns no issues yet
/// adopts the prefix of a log whose records all share one, which is how a
/// fresh checkout registered under another name picks up the existing ids.
/// A non-empty log with no record under the prefix is refused: importing it
/// would skip everything and the following export would empty the log.
fn import_prefix(storage: &Storage, collection: &Collection, entries: &[(usize, LogRecord)]) -> Result<String> {
    let current = storage
        .get_collection(&collection.id)?
        .map(|c| c.prefix)
        .unwrap_or_else(|| collection.prefix.clone());

    if entries.is_empty() || entries.iter().any(|(_, r)| belongs_to_prefix(&r.id, &current)) {
        return Ok(current);
    }

    let found: BTreeSet<&str> = entries.iter().filter_map(|(_, r)| prefix_of(&r.id)).collect();
    if found.len() == 1 && storage.collection_issues(&collection.id)?.is_empty() {
        let adopted = found.iter().next().map(|p| p.to_string()).unwrap_or_default();
        log::warn!(
            "collection {} adopts prefix '{}' from its log (was '{}')",
            collection.id,
            adopted,
            current
        );
        storage.set_collection_prefix(&collection.id, &adopted)?;
        return Ok(adopted);
    }

    Err(eyre::eyre!(StoreError::PrefixMismatch {
        collection: collection.id.clone(),
        prefix: current,
        found: found.into_iter().map(String::from).collect(),
    }))
}

/// Regenerate `collection`'s log from the store.
///
/// The file is only rewritten, and the marker only advanced, when the bytes
/// change.
pub fn export_collection(store: &mut Store, collection: &Collection) -> Result<ExportReport> {
    let storage = &store.storage;

    let mut records = Vec::new();
    let mut skipped = 0;
    for issue in storage.collection_issues(&collection.id)? {
        if !belongs_to_prefix(&issue.id, &collection.prefix) {
            log::warn!(
                "not exporting {} to {}: id does not match prefix '{}' (see `trc repair`)",
                issue.id,
                collection.id,
                collection.prefix
            );
            skipped += 1;
            continue;
        }
        let edges = storage.edges_from(&issue.id)?;
        let comments = storage.comments_for(&issue.id)?;
        records.push(LogRecord::from_parts(&issue, &edges, &comments));
    }

    let text = jsonl::encode(&records)?;
    let bytes = text.as_bytes();
    let path = collection.log_path();

    let unchanged = match std::fs::read(&path) {
        Ok(current) => current == bytes,
        Err(_) => false,
    };
    if !unchanged {
        jsonl::write_atomic(&path, bytes)?;
        log::info!("exported {} records to {}", records.len(), path.display());
    }

    let key = marker_key(&collection.id);
    let current = fingerprint(bytes);
    if storage.get_meta(&key)?.as_deref() != Some(current.as_str()) {
        storage.set_meta(&key, &current)?;
    }

    Ok(ExportReport {
        collection_id: collection.id.clone(),
        records: records.len(),
        skipped,
        written: !unchanged,
    })
}
