//! High-level store API for trace.

use crate::id::{belongs_to_prefix, generate_id, prefix_of, sanitize_prefix};
use crate::storage::Storage;
use crate::types::{Collection, Comment, Edge, EdgeKind, Filter, Issue, Status, ValidationError, normalize_time};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("issue not found: {0}")]
    NotFound(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("making {from} a child of {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("cannot close {id}: open children {}", .children.join(", "))]
    OpenChildren { id: String, children: Vec<String> },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: String, waited: Duration },

    #[error("could not generate a free id with prefix '{prefix}' after {attempts} attempts")]
    GenerationExhausted { prefix: String, attempts: usize },

    #[error(
        "log for {collection} holds no ids with prefix '{prefix}' (found: {}); refusing to overwrite it",
        .found.join(", ")
    )]
    PrefixMismatch {
        collection: String,
        prefix: String,
        found: Vec<String>,
    },
}

/// Source of "now" for every timestamp the store writes.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of closing an issue.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub issue: Issue,
    /// Non-empty only for forced closes over open children.
    pub warnings: Vec<String>,
}

/// Result of reassigning issues whose id prefix disagrees with their collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairReport {
    pub examined: usize,
    pub mismatched: usize,
    /// Moved (or, on a dry run, movable) to the collection owning their prefix
    pub repaired: usize,
    /// Mismatched, but no registered collection owns the prefix
    pub orphaned: Vec<String>,
}

/// The main trace store.
pub struct Store {
    pub(crate) storage: Storage,
    clock: Box<dyn Clock>,
}

impl Store {
    /// Open (creating if needed) the store database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let storage = Storage::open(db_path)?;
        Ok(Self {
            storage,
            clock: Box::new(SystemClock),
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Ok(Self {
            storage,
            clock: Box::new(SystemClock),
        })
    }

    /// Replace the clock used for timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        normalize_time(self.clock.now())
    }

    /// Read a metadata value.
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        self.storage.get_meta(key)
    }

    // ----------------------------------------------------------------------
    // Collections
    // ----------------------------------------------------------------------

    /// Register a collection rooted at `path`, or refresh its name.
    ///
    /// The prefix is derived from `name` on first registration and never
    /// changes afterwards, since existing ids and the log depend on it.
    pub fn register_collection(&mut self, path: &Path, name: &str) -> Result<Collection> {
        let id = path.to_string_lossy().to_string();
        if !path.is_absolute() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::RelativeCollectionPath(id))));
        }

        let prefix = sanitize_prefix(name);
        if prefix.is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyPrefix(
                name.to_string()
            ))));
        }

        if let Some(existing) = self.storage.get_collection(&id)?
            && existing.prefix != prefix
        {
            log::info!(
                "collection {} keeps prefix '{}' under new name '{}'",
                id,
                existing.prefix,
                name
            );
        }

        let collection = Collection {
            id: id.clone(),
            name: name.to_string(),
            prefix,
            registered_at: self.now(),
        };
        self.storage
            .upsert_collection(&collection)
            .context("Failed to register collection")?;
        log::debug!("registered collection {} ({})", collection.id, collection.prefix);

        self.require_collection(&id)
    }

    pub fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        self.storage.get_collection(id)
    }

    /// Get a collection or fail with `CollectionNotFound`.
    pub fn require_collection(&self, id: &str) -> Result<Collection> {
        self.storage
            .get_collection(id)?
            .ok_or_else(|| eyre::eyre!(StoreError::CollectionNotFound(id.to_string())))
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        self.storage.list_collections()
    }

    // ----------------------------------------------------------------------
    // Issues
    // ----------------------------------------------------------------------

    /// Create a new issue, optionally as a child of `parent`.
    pub fn create(
        &mut self,
        collection_id: &str,
        title: &str,
        priority: u8,
        description: Option<&str>,
        parent: Option<&str>,
    ) -> Result<Issue> {
        let collection = self.require_collection(collection_id)?;
        if let Some(parent_id) = parent {
            self.require(parent_id)?;
        }

        let existing = self.storage.ids_with_prefix(&collection.prefix)?;
        let id = generate_id(title, &collection.prefix, &existing).map_err(|e| eyre::eyre!(e))?;

        let now = self.now();
        let issue = Issue {
            id,
            collection_id: collection.id,
            title: title.to_string(),
            description: description.map(String::from),
            status: Status::Open,
            priority,
            created_at: now,
            updated_at: now,
            closed_at: None,
            extra: serde_json::Map::new(),
        };

        // Validate before persisting
        issue.validate().map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        let tx = self.storage.transaction()?;
        self.storage.insert_issue(&issue)?;
        if let Some(parent_id) = parent {
            self.storage.insert_edge(&Edge {
                from_id: issue.id.clone(),
                to_id: parent_id.to_string(),
                kind: EdgeKind::Parent,
                created_at: now,
            })?;
        }
        tx.commit().context("Failed to persist issue")?;

        log::debug!("created {} in {}", issue.id, issue.collection_id);
        Ok(issue)
    }

    /// Get an issue by ID.
    pub fn get(&self, id: &str) -> Result<Option<Issue>> {
        self.storage.get_issue(id)
    }

    /// Get an issue or fail with `NotFound`.
    pub fn require(&self, id: &str) -> Result<Issue> {
        self.storage
            .get_issue(id)?
            .ok_or_else(|| eyre::eyre!(StoreError::NotFound(id.to_string())))
    }

    /// Update an issue's fields.
    pub fn update(
        &mut self,
        id: &str,
        title: Option<&str>,
        description: Option<Option<&str>>,
        priority: Option<u8>,
    ) -> Result<Issue> {
        let existing = self.require(id)?;

        let updated = Issue {
            title: title.map(String::from).unwrap_or(existing.title),
            description: match description {
                Some(d) => d.map(String::from),
                None => existing.description,
            },
            priority: priority.unwrap_or(existing.priority),
            updated_at: self.now().max(existing.created_at),
            ..existing
        };

        // Validate before persisting
        updated.validate().map_err(|e| eyre::eyre!(StoreError::Validation(e)))?;

        self.storage
            .update_issue(&updated)
            .context("Failed to persist updated issue")?;

        Ok(updated)
    }

    /// Change an issue's status.
    ///
    /// Moving to `Closed` goes through the same open-children guard as
    /// [`Store::close`]; leaving `Closed` clears `closed_at`.
    pub fn set_status(&mut self, id: &str, status: Status) -> Result<Issue> {
        if status == Status::Closed {
            return self.close(id, false).map(|outcome| outcome.issue);
        }

        let existing = self.require(id)?;
        if !existing.status.can_transition_to(&status) {
            return Err(eyre::eyre!(StoreError::InvalidTransition {
                from: existing.status,
                to: status
            }));
        }

        let updated = Issue {
            status,
            updated_at: self.now().max(existing.created_at),
            closed_at: None,
            ..existing
        };

        self.storage
            .update_issue(&updated)
            .context("Failed to persist status change")?;

        Ok(updated)
    }

    /// Close an issue.
    ///
    /// Fails with `OpenChildren` while any child is not closed, unless
    /// `force` is set; a forced close reports the open children as warnings.
    /// Closing an already closed issue is a no-op.
    pub fn close(&mut self, id: &str, force: bool) -> Result<CloseOutcome> {
        let existing = self.require(id)?;
        if existing.status == Status::Closed {
            return Ok(CloseOutcome {
                issue: existing,
                warnings: Vec::new(),
            });
        }

        let open_children: Vec<String> = self
            .storage
            .children_of(id)?
            .into_iter()
            .filter(|child| child.status != Status::Closed)
            .map(|child| child.id)
            .collect();

        let mut warnings = Vec::new();
        if !open_children.is_empty() {
            if !force {
                return Err(eyre::eyre!(StoreError::OpenChildren {
                    id: id.to_string(),
                    children: open_children,
                }));
            }
            let warning = format!("closed {} with open children: {}", id, open_children.join(", "));
            log::warn!("{}", warning);
            warnings.push(warning);
        }

        let now = self.now().max(existing.created_at);
        let updated = Issue {
            status: Status::Closed,
            updated_at: now,
            closed_at: Some(now),
            ..existing
        };

        self.storage.update_issue(&updated).context("Failed to persist close")?;

        Ok(CloseOutcome {
            issue: updated,
            warnings,
        })
    }

    /// List issues matching a filter.
    pub fn list(&self, filter: &Filter) -> Result<Vec<Issue>> {
        self.storage.list_issues(filter)
    }

    /// Find issues whose id prefix does not match their collection and hand
    /// each to the registered collection that owns the prefix.
    ///
    /// Restricted to `collection_id` when given. With `dry_run` nothing is
    /// written. Ids are kept, so edges and comments need no rewrite.
    pub fn repair_prefixes(&mut self, collection_id: Option<&str>, dry_run: bool) -> Result<RepairReport> {
        let collections = self.storage.list_collections()?;
        let mut filter = Filter::new();
        if let Some(collection_id) = collection_id {
            filter = filter.collection(collection_id);
        }

        let mut report = RepairReport::default();
        let tx = self.storage.transaction()?;
        for issue in self.storage.list_issues(&filter)? {
            report.examined += 1;
            let Some(current) = collections.iter().find(|c| c.id == issue.collection_id) else {
                continue;
            };
            if belongs_to_prefix(&issue.id, &current.prefix) {
                continue;
            }

            report.mismatched += 1;
            let owner = prefix_of(&issue.id).and_then(|prefix| collections.iter().find(|c| c.prefix == prefix));
            match owner {
                Some(owner) => {
                    if !dry_run {
                        self.storage.set_issue_collection(&issue.id, &owner.id)?;
                    }
                    log::info!("{} belongs to {}, not {}", issue.id, owner.id, current.id);
                    report.repaired += 1;
                }
                None => {
                    log::warn!("{} in {} matches no registered collection", issue.id, current.id);
                    report.orphaned.push(issue.id);
                }
            }
        }
        if !dry_run {
            tx.commit().context("Failed to persist repair")?;
        }

        Ok(report)
    }

    // ----------------------------------------------------------------------
    // Comments
    // ----------------------------------------------------------------------

    /// Append a comment to an issue.
    pub fn add_comment(&mut self, id: &str, content: &str, source: &str) -> Result<Comment> {
        if content.trim().is_empty() {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::EmptyComment)));
        }
        self.require(id)?;

        let now = self.now();
        let comment = Comment {
            issue_id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            created_at: now,
        };

        let tx = self.storage.transaction()?;
        self.storage.insert_comment(&comment)?;
        self.storage.touch(id, &now)?;
        tx.commit().context("Failed to persist comment")?;

        Ok(comment)
    }

    /// Comments on an issue, oldest first.
    pub fn comments(&self, id: &str) -> Result<Vec<Comment>> {
        self.storage.comments_for(id)
    }
}
