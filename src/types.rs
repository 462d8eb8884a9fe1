//! Core data types for the trace issue graph.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Maximum title length in characters.
pub const MAX_TITLE_LEN: usize = 500;

/// Highest (least urgent) priority.
pub const MAX_PRIORITY: u8 = 4;

/// The core unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    /// "{prefix}-" + 6 base36 chars
    pub id: String,

    /// Absolute path of the owning collection
    pub collection_id: String,

    /// Short description of the work
    pub title: String,

    /// Optional longer description (markdown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current state
    pub status: Status,

    /// Priority 0-4 (0 = critical, 4 = backlog)
    pub priority: u8,

    /// When created
    pub created_at: DateTime<Utc>,

    /// Last modification
    pub updated_at: DateTime<Utc>,

    /// When closed (set iff status == Closed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Log fields this version does not know about, kept for round-tripping
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Issue status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl Status {
    /// Check if a status transition is valid.
    pub fn can_transition_to(&self, target: &Status) -> bool {
        use Status::*;
        match (self, target) {
            (a, b) if a == b => true,
            // Closed items can only be reopened
            (Closed, Open) => true,
            (Closed, _) => false,
            _ => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "blocked" => Ok(Status::Blocked),
            "closed" => Ok(Status::Closed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// Relationship between two issues.
///
/// `from_id` depends on `to_id`: for `Parent` the from side is the child,
/// for `Blocks` the from side cannot proceed until `to_id` closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
}

/// Types of relationships between issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// from_id is a child of to_id (single parent, acyclic)
    Parent,

    /// to_id blocks from_id
    Blocks,

    /// Informational link, no blocking semantics
    Related,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Parent => "parent",
            EdgeKind::Blocks => "blocks",
            EdgeKind::Related => "related",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(EdgeKind::Parent),
            "blocks" => Ok(EdgeKind::Blocks),
            "related" => Ok(EdgeKind::Related),
            other => Err(ValidationError::InvalidEdgeKind(other.to_string())),
        }
    }
}

/// An independently addressable partition of issues (a project).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    /// Absolute path of the collection's working directory
    pub id: String,

    /// Display name
    pub name: String,

    /// Id prefix derived from the name
    pub prefix: String,

    pub registered_at: DateTime<Utc>,
}

impl Collection {
    /// Directory holding the collection's text log.
    pub fn trace_dir(&self) -> PathBuf {
        PathBuf::from(&self.id).join(".trace")
    }

    /// Path of the collection's text log.
    pub fn log_path(&self) -> PathBuf {
        self.trace_dir().join("issues.jsonl")
    }
}

/// Append-only annotation on an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub issue_id: String,
    pub content: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing issues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub collection_id: Option<String>,
    pub statuses: Option<Vec<Status>>,
    pub min_priority: Option<u8>,
    pub max_priority: Option<u8>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one collection.
    pub fn collection(mut self, collection_id: impl Into<String>) -> Self {
        self.collection_id = Some(collection_id.into());
        self
    }

    /// Add a status to the accepted set.
    pub fn status(mut self, status: Status) -> Self {
        self.statuses.get_or_insert_with(Vec::new).push(status);
        self
    }

    /// Everything that is not closed.
    pub fn not_closed(self) -> Self {
        self.status(Status::Open).status(Status::InProgress).status(Status::Blocked)
    }

    pub fn min_priority(mut self, priority: u8) -> Self {
        self.min_priority = Some(priority);
        self
    }

    pub fn max_priority(mut self, priority: u8) -> Self {
        self.max_priority = Some(priority);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Validation errors for issues and graph requests.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("title cannot be empty")]
    EmptyTitle,
    #[error("title exceeds 500 characters")]
    TitleTooLong,
    #[error("title contains control characters")]
    InvalidCharacters,
    #[error("priority must be 0-4")]
    InvalidPriority,
    #[error("invalid status '{0}'")]
    InvalidStatus(String),
    #[error("invalid edge kind '{0}'")]
    InvalidEdgeKind(String),
    #[error("updated_at cannot be before created_at")]
    InvalidTimestamp,
    #[error("closed_at must be set exactly when status is closed")]
    ClosedAtMismatch,
    #[error("cannot create edge from {0} to itself")]
    SelfReferentialEdge(String),
    #[error("{child} already has parent {parent}")]
    ParentAlreadySet { child: String, parent: String },
    #[error("collection path must be absolute: {0}")]
    RelativeCollectionPath(String),
    #[error("collection name '{0}' yields an empty id prefix")]
    EmptyPrefix(String),
    #[error("{id} is already in collection {collection_id}")]
    SameCollection { id: String, collection_id: String },
    #[error("comment cannot be empty")]
    EmptyComment,
}

impl Issue {
    /// Validate the issue's fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong);
        }
        if self.title.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidCharacters);
        }

        if self.priority > MAX_PRIORITY {
            return Err(ValidationError::InvalidPriority);
        }

        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamp);
        }

        if self.closed_at.is_some() != (self.status == Status::Closed) {
            return Err(ValidationError::ClosedAtMismatch);
        }

        Ok(())
    }
}

/// Truncate to the precision the store keeps.
pub fn normalize_time(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(6)
}

/// Fixed-width RFC 3339 form; lexical order matches chronological order.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}
