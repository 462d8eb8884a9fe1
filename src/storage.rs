//! Storage layer: the SQLite relational store.
//!
//! Every integrity rule that SQL can express lives in the schema: status,
//! priority and edge kind domains, the `closed_at` invariant, edge
//! uniqueness, no self-loops and at most one parent per issue. Graph rules
//! that need traversal (acyclicity) are enforced one layer up.

use crate::types::{Collection, Comment, Edge, EdgeKind, Filter, Issue, Status, format_time};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Current schema version, recorded in `metadata`.
pub const SCHEMA_VERSION: u32 = 1;

/// How long a connection waits on a busy database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ISSUE_COLUMNS: &str =
    "id, collection_id, title, description, status, priority, created_at, updated_at, closed_at, extra";

/// Handle to the SQLite database.
pub struct Storage {
    db: Connection,
}

impl Storage {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::from_connection(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(db)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.busy_timeout(BUSY_TIMEOUT).context("Failed to set busy timeout")?;
        db.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        let storage = Self { db };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS collections (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    prefix TEXT NOT NULL CHECK (prefix <> ''),
                    registered_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id TEXT PRIMARY KEY,
                    collection_id TEXT NOT NULL REFERENCES collections(id),
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('open', 'in_progress', 'blocked', 'closed')),
                    priority INTEGER NOT NULL CHECK (priority BETWEEN 0 AND 4),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    closed_at TEXT,
                    extra TEXT,
                    CHECK ((status = 'closed') = (closed_at IS NOT NULL))
                );
                CREATE INDEX IF NOT EXISTS idx_issues_collection ON issues(collection_id);
                CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
                CREATE INDEX IF NOT EXISTS idx_issues_order ON issues(priority, created_at);

                CREATE TABLE IF NOT EXISTS dependencies (
                    from_id TEXT NOT NULL REFERENCES issues(id) ON UPDATE CASCADE ON DELETE CASCADE,
                    to_id TEXT NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('parent', 'blocks', 'related')),
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (from_id, to_id, kind),
                    CHECK (from_id <> to_id)
                );
                CREATE INDEX IF NOT EXISTS idx_edges_to ON dependencies(to_id);
                CREATE INDEX IF NOT EXISTS idx_edges_kind ON dependencies(kind);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_single_parent
                    ON dependencies(from_id) WHERE kind = 'parent';

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    issue_id TEXT NOT NULL REFERENCES issues(id) ON UPDATE CASCADE ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    source TEXT NOT NULL DEFAULT 'user',
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);

                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .context("Failed to initialize schema")?;

        self.db
            .execute(
                "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )
            .context("Failed to record schema version")?;

        Ok(())
    }

    /// Begin a transaction; it rolls back on drop unless committed.
    ///
    /// Statements issued through `&self` while the transaction is open
    /// belong to it, so helpers below can be used inside.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.db.unchecked_transaction().context("Failed to begin transaction")
    }

    // ----------------------------------------------------------------------
    // Collections
    // ----------------------------------------------------------------------

    /// Insert a collection, or refresh an existing one's name.
    ///
    /// An existing collection keeps its prefix and registration time.
    pub fn upsert_collection(&self, collection: &Collection) -> Result<()> {
        self.db
            .execute(
                r#"
                INSERT INTO collections (id, name, prefix, registered_at) VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name
                "#,
                params![
                    collection.id,
                    collection.name,
                    collection.prefix,
                    format_time(&collection.registered_at)
                ],
            )
            .context("Failed to upsert collection")?;
        Ok(())
    }

    pub fn set_collection_prefix(&self, id: &str, prefix: &str) -> Result<()> {
        self.db
            .execute("UPDATE collections SET prefix = ? WHERE id = ?", params![prefix, id])
            .context("Failed to update collection prefix")?;
        Ok(())
    }

    pub fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        self.db
            .query_row(
                "SELECT id, name, prefix, registered_at FROM collections WHERE id = ?",
                params![id],
                Self::row_to_collection,
            )
            .optional()
            .context("Failed to load collection")
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut stmt = self
            .db
            .prepare("SELECT id, name, prefix, registered_at FROM collections ORDER BY id")?;
        let collections = stmt
            .query_map([], Self::row_to_collection)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list collections")?;
        Ok(collections)
    }

    // ----------------------------------------------------------------------
    // Issues
    // ----------------------------------------------------------------------

    /// Insert a new issue row.
    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        self.db
            .execute(
                r#"
                INSERT INTO issues (id, collection_id, title, description, status, priority, created_at, updated_at, closed_at, extra)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    issue.id,
                    issue.collection_id,
                    issue.title,
                    issue.description,
                    issue.status.as_str(),
                    issue.priority,
                    format_time(&issue.created_at),
                    format_time(&issue.updated_at),
                    issue.closed_at.as_ref().map(format_time),
                    extra_to_sql(issue)?,
                ],
            )
            .with_context(|| format!("Failed to insert issue {}", issue.id))?;
        Ok(())
    }

    /// Overwrite every column of an existing issue row.
    pub fn update_issue(&self, issue: &Issue) -> Result<()> {
        self.db
            .execute(
                r#"
                UPDATE issues
                SET collection_id = ?, title = ?, description = ?, status = ?, priority = ?,
                    created_at = ?, updated_at = ?, closed_at = ?, extra = ?
                WHERE id = ?
                "#,
                params![
                    issue.collection_id,
                    issue.title,
                    issue.description,
                    issue.status.as_str(),
                    issue.priority,
                    format_time(&issue.created_at),
                    format_time(&issue.updated_at),
                    issue.closed_at.as_ref().map(format_time),
                    extra_to_sql(issue)?,
                    issue.id,
                ],
            )
            .with_context(|| format!("Failed to update issue {}", issue.id))?;
        Ok(())
    }

    /// Get an issue by ID.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        self.db
            .query_row(
                &format!("SELECT {} FROM issues WHERE id = ?", ISSUE_COLUMNS),
                params![id],
                Self::row_to_issue,
            )
            .optional()
            .with_context(|| format!("Failed to load issue {}", id))
    }

    /// All ids already using `prefix`, for collision checks.
    pub fn ids_with_prefix(&self, prefix: &str) -> Result<HashSet<String>> {
        let pattern = format!("{}-%", escape_like(prefix));
        let mut stmt = self
            .db
            .prepare("SELECT id FROM issues WHERE id LIKE ? ESCAPE '\\'")?;
        let ids = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    /// List issues matching `filter`, ordered by priority, then age, then id.
    pub fn list_issues(&self, filter: &Filter) -> Result<Vec<Issue>> {
        let mut sql = format!("SELECT {} FROM issues WHERE 1=1", ISSUE_COLUMNS);
        let mut args: Vec<Value> = Vec::new();

        if let Some(collection_id) = &filter.collection_id {
            sql.push_str(" AND collection_id = ?");
            args.push(Value::Text(collection_id.clone()));
        }
        if let Some(statuses) = &filter.statuses {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            args.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        }
        if let Some(min) = filter.min_priority {
            sql.push_str(" AND priority >= ?");
            args.push(Value::Integer(min as i64));
        }
        if let Some(max) = filter.max_priority {
            sql.push_str(" AND priority <= ?");
            args.push(Value::Integer(max as i64));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.db.prepare(&sql)?;
        let issues = stmt
            .query_map(params_from_iter(args), Self::row_to_issue)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list issues")?;
        Ok(issues)
    }

    /// Issues owned by a collection, sorted by id.
    pub fn collection_issues(&self, collection_id: &str) -> Result<Vec<Issue>> {
        let mut stmt = self.db.prepare(&format!(
            "SELECT {} FROM issues WHERE collection_id = ? ORDER BY id",
            ISSUE_COLUMNS
        ))?;
        let issues = stmt
            .query_map(params![collection_id], Self::row_to_issue)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load collection issues")?;
        Ok(issues)
    }

    /// Bump `updated_at`.
    pub fn touch(&self, id: &str, now: &DateTime<Utc>) -> Result<()> {
        self.db
            .execute("UPDATE issues SET updated_at = ? WHERE id = ?", params![format_time(now), id])?;
        Ok(())
    }

    /// Hand an issue to another collection without touching its id.
    pub fn set_issue_collection(&self, id: &str, collection_id: &str) -> Result<()> {
        self.db
            .execute(
                "UPDATE issues SET collection_id = ? WHERE id = ?",
                params![collection_id, id],
            )
            .with_context(|| format!("Failed to reassign {}", id))?;
        Ok(())
    }

    /// Give an issue a new id and owner.
    ///
    /// Outgoing edges and comments follow through `ON UPDATE CASCADE`;
    /// incoming edges are rewritten here.
    pub fn rename_issue(&self, old_id: &str, new_id: &str, collection_id: &str, now: &DateTime<Utc>) -> Result<()> {
        let changed = self
            .db
            .execute(
                "UPDATE issues SET id = ?, collection_id = ?, updated_at = ? WHERE id = ?",
                params![new_id, collection_id, format_time(now), old_id],
            )
            .with_context(|| format!("Failed to rename {} to {}", old_id, new_id))?;
        if changed != 1 {
            eyre::bail!("rename of {} touched {} rows", old_id, changed);
        }

        self.db
            .execute(
                "UPDATE dependencies SET to_id = ? WHERE to_id = ?",
                params![new_id, old_id],
            )
            .with_context(|| format!("Failed to rewrite edges pointing at {}", old_id))?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Edges
    // ----------------------------------------------------------------------

    /// Insert an edge into SQLite.
    pub fn insert_edge(&self, edge: &Edge) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO dependencies (from_id, to_id, kind, created_at) VALUES (?, ?, ?, ?)",
                params![
                    edge.from_id,
                    edge.to_id,
                    edge.kind.as_str(),
                    format_time(&edge.created_at)
                ],
            )
            .with_context(|| format!("Failed to insert edge {} -> {} ({})", edge.from_id, edge.to_id, edge.kind))?;
        Ok(())
    }

    /// Delete one edge; returns whether it existed.
    pub fn delete_edge(&self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<bool> {
        let n = self.db.execute(
            "DELETE FROM dependencies WHERE from_id = ? AND to_id = ? AND kind = ?",
            params![from_id, to_id, kind.as_str()],
        )?;
        Ok(n > 0)
    }

    /// Delete the parent edge of `from_id`, if any.
    pub fn delete_parent_edge(&self, from_id: &str) -> Result<bool> {
        let n = self.db.execute(
            "DELETE FROM dependencies WHERE from_id = ? AND kind = 'parent'",
            params![from_id],
        )?;
        Ok(n > 0)
    }

    /// Delete every outgoing edge of `from_id`.
    pub fn delete_edges_from(&self, from_id: &str) -> Result<usize> {
        let n = self
            .db
            .execute("DELETE FROM dependencies WHERE from_id = ?", params![from_id])?;
        Ok(n)
    }

    /// Check if an edge exists.
    #[cfg(test)]
    pub fn edge_exists(&self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<bool> {
        let exists: bool = self.db.query_row(
            "SELECT EXISTS(SELECT 1 FROM dependencies WHERE from_id = ? AND to_id = ? AND kind = ?)",
            params![from_id, to_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_edge(&self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<Option<Edge>> {
        self.db
            .query_row(
                "SELECT from_id, to_id, kind, created_at FROM dependencies WHERE from_id = ? AND to_id = ? AND kind = ?",
                params![from_id, to_id, kind.as_str()],
                Self::row_to_edge,
            )
            .optional()
            .context("Failed to load edge")
    }

    /// Outgoing edges, sorted by target then kind.
    pub fn edges_from(&self, from_id: &str) -> Result<Vec<Edge>> {
        let mut stmt = self.db.prepare(
            "SELECT from_id, to_id, kind, created_at FROM dependencies WHERE from_id = ? ORDER BY to_id, kind",
        )?;
        let edges = stmt
            .query_map(params![from_id], Self::row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Incoming edges, sorted by source then kind.
    pub fn edges_to(&self, to_id: &str) -> Result<Vec<Edge>> {
        let mut stmt = self.db.prepare(
            "SELECT from_id, to_id, kind, created_at FROM dependencies WHERE to_id = ? ORDER BY from_id, kind",
        )?;
        let edges = stmt
            .query_map(params![to_id], Self::row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn parent_of(&self, id: &str) -> Result<Option<String>> {
        self.db
            .query_row(
                "SELECT to_id FROM dependencies WHERE from_id = ? AND kind = 'parent'",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load parent")
    }

    /// Child issues (incoming parent edges), oldest first.
    pub fn children_of(&self, id: &str) -> Result<Vec<Issue>> {
        let mut stmt = self.db.prepare(&format!(
            r#"
            SELECT {} FROM issues
            WHERE id IN (SELECT from_id FROM dependencies WHERE to_id = ? AND kind = 'parent')
            ORDER BY created_at, id
            "#,
            ISSUE_COLUMNS
        ))?;
        let children = stmt
            .query_map(params![id], Self::row_to_issue)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(children)
    }

    /// Issues that `id` has a blocks edge to.
    pub fn blockers_of(&self, id: &str) -> Result<Vec<Issue>> {
        let mut stmt = self.db.prepare(&format!(
            r#"
            SELECT {} FROM issues
            WHERE id IN (SELECT to_id FROM dependencies WHERE from_id = ? AND kind = 'blocks')
            ORDER BY priority, created_at, id
            "#,
            ISSUE_COLUMNS
        ))?;
        let blockers = stmt
            .query_map(params![id], Self::row_to_issue)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(blockers)
    }

    /// Whether `candidate` is on the parent chain above `id`.
    pub fn is_ancestor(&self, candidate: &str, id: &str) -> Result<bool> {
        let found: bool = self.db.query_row(
            r#"
            WITH RECURSIVE chain(id) AS (
                SELECT to_id FROM dependencies WHERE from_id = ?1 AND kind = 'parent'
                UNION
                SELECT d.to_id FROM dependencies d JOIN chain c ON d.from_id = c.id
                WHERE d.kind = 'parent'
            )
            SELECT EXISTS(SELECT 1 FROM chain WHERE id = ?2)
            "#,
            params![id, candidate],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    /// Every issue below `id` in the parent tree, sorted by id.
    pub fn descendants(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self.db.prepare(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT from_id FROM dependencies WHERE to_id = ?1 AND kind = 'parent'
                UNION
                SELECT d.from_id FROM dependencies d JOIN subtree s ON d.to_id = s.id
                WHERE d.kind = 'parent'
            )
            SELECT id FROM subtree WHERE id <> ?1 ORDER BY id
            "#,
        )?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Ids of every graph-blocked issue.
    ///
    /// An issue is blocked when it has a blocks edge to an existing,
    /// non-closed issue, or when its parent is blocked. Edges to ids that
    /// are not in the store never block.
    pub fn blocked_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.db.prepare(
            r#"
            WITH RECURSIVE blocked(id) AS (
                SELECT e.from_id FROM dependencies e
                JOIN issues blocker ON blocker.id = e.to_id
                WHERE e.kind = 'blocks' AND blocker.status <> 'closed'
                UNION
                SELECT e.from_id FROM dependencies e JOIN blocked b ON e.to_id = b.id
                WHERE e.kind = 'parent'
            )
            SELECT id FROM blocked
            "#,
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .context("Failed to compute blocked set")?;
        Ok(ids)
    }

    // ----------------------------------------------------------------------
    // Comments
    // ----------------------------------------------------------------------

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO comments (issue_id, content, source, created_at) VALUES (?, ?, ?, ?)",
                params![
                    comment.issue_id,
                    comment.content,
                    comment.source,
                    format_time(&comment.created_at)
                ],
            )
            .with_context(|| format!("Failed to add comment to {}", comment.issue_id))?;
        Ok(())
    }

    /// Comments on an issue, oldest first.
    pub fn comments_for(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self.db.prepare(
            "SELECT issue_id, content, source, created_at FROM comments WHERE issue_id = ? ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map(params![issue_id], |row| {
                Ok(Comment {
                    issue_id: row.get(0)?,
                    content: row.get(1)?,
                    source: row.get(2)?,
                    created_at: parse_time(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    pub fn delete_comments(&self, issue_id: &str) -> Result<usize> {
        let n = self
            .db
            .execute("DELETE FROM comments WHERE issue_id = ?", params![issue_id])?;
        Ok(n)
    }

    // ----------------------------------------------------------------------
    // Metadata
    // ----------------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.db
            .query_row("SELECT value FROM metadata WHERE key = ?", params![key], |row| row.get(0))
            .optional()
            .context("Failed to read metadata")
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .context("Failed to write metadata")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn count_issues(&self) -> Result<usize> {
        let n: i64 = self.db.query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    #[cfg(test)]
    pub fn count_edges(&self) -> Result<usize> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM dependencies", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ----------------------------------------------------------------------
    // Row mapping
    // ----------------------------------------------------------------------

    /// Convert a database row to an Issue.
    fn row_to_issue(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
        let status_str: String = row.get(4)?;
        let status = status_str
            .parse::<Status>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;

        let closed_at = match row.get::<_, Option<String>>(8)? {
            Some(_) => Some(parse_time(row, 8)?),
            None => None,
        };

        let extra = match row.get::<_, Option<String>>(9)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e)))?,
            None => serde_json::Map::new(),
        };

        Ok(Issue {
            id: row.get(0)?,
            collection_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status,
            priority: row.get(5)?,
            created_at: parse_time(row, 6)?,
            updated_at: parse_time(row, 7)?,
            closed_at,
            extra,
        })
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
        let kind_str: String = row.get(2)?;
        let kind = kind_str
            .parse::<EdgeKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;

        Ok(Edge {
            from_id: row.get(0)?,
            to_id: row.get(1)?,
            kind,
            created_at: parse_time(row, 3)?,
        })
    }

    fn row_to_collection(row: &rusqlite::Row) -> rusqlite::Result<Collection> {
        Ok(Collection {
            id: row.get(0)?,
            name: row.get(1)?,
            prefix: row.get(2)?,
            registered_at: parse_time(row, 3)?,
        })
    }
}

fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn extra_to_sql(issue: &Issue) -> Result<Option<String>> {
    if issue.extra.is_empty() {
        return Ok(None);
    }
    let json = serde_json::to_string(&issue.extra).context("Failed to serialize extra fields")?;
    Ok(Some(json))
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
