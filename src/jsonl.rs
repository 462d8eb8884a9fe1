//! JSONL text log: one issue per line, with its outgoing edges and comments.
//!
//! The log is the shareable form of a collection. It is written sorted by id
//! with deterministic field order so identical data yields identical bytes.

use crate::types::{Comment, Edge, EdgeKind, Issue, Status, ValidationError, format_time, normalize_time};
use chrono::{DateTime, NaiveDateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// One line of the text log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: Status,
    pub priority: u8,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "optional_timestamp", skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<LogDependency>,
    #[serde(default)]
    pub comments: Vec<LogComment>,
    /// Fields this version does not understand
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outgoing edge of a logged issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogDependency {
    #[serde(alias = "depends_on_id")]
    pub to_id: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogComment {
    pub content: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

fn default_source() -> String {
    "user".to_string()
}

/// A log line that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl LogRecord {
    /// Build the log form of an issue.
    pub fn from_parts(issue: &Issue, edges: &[Edge], comments: &[Comment]) -> Self {
        let mut dependencies: Vec<LogDependency> = edges
            .iter()
            .map(|e| LogDependency {
                to_id: e.to_id.clone(),
                kind: e.kind,
            })
            .collect();
        dependencies.sort();

        Self {
            id: issue.id.clone(),
            title: issue.title.clone(),
            description: issue.description.clone(),
            status: issue.status,
            priority: issue.priority,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: issue.closed_at,
            dependencies,
            comments: comments
                .iter()
                .map(|c| LogComment {
                    content: c.content.clone(),
                    source: c.source.clone(),
                    created_at: c.created_at,
                })
                .collect(),
            extra: issue.extra.clone(),
        }
    }

    /// The issue row this record describes, owned by `collection_id`.
    pub fn to_issue(&self, collection_id: &str) -> Issue {
        Issue {
            id: self.id.clone(),
            collection_id: collection_id.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            extra: self.extra.clone(),
        }
    }

    /// Edge rows for the record's dependencies.
    ///
    /// Logs carry no edge timestamps, so edges take the record's
    /// `updated_at`.
    pub fn to_edges(&self) -> Vec<Edge> {
        self.dependencies
            .iter()
            .map(|d| Edge {
                from_id: self.id.clone(),
                to_id: d.to_id.clone(),
                kind: d.kind,
                created_at: self.updated_at,
            })
            .collect()
    }

    pub fn to_comments(&self) -> Vec<Comment> {
        self.comments
            .iter()
            .map(|c| Comment {
                issue_id: self.id.clone(),
                content: c.content.clone(),
                source: c.source.clone(),
                created_at: c.created_at,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.to_issue("").validate()
    }
}

/// Decode log bytes into records.
///
/// Lines that are not UTF-8, fail to parse, or fail validation become
/// warnings; blank lines are skipped. When an id appears twice, both records
/// are returned (the later one wins on import) and a warning is recorded.
pub fn decode(bytes: impl AsRef<[u8]>) -> (Vec<LogRecord>, Vec<ParseWarning>) {
    let (entries, warnings) = decode_lines(bytes.as_ref());
    (entries.into_iter().map(|(_, record)| record).collect(), warnings)
}

/// Like [`decode`], keeping each record's 1-based line number.
pub fn decode_lines(bytes: &[u8]) -> (Vec<(usize, LogRecord)>, Vec<ParseWarning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_no = idx + 1;
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warnings.push(ParseWarning {
                    line: line_no,
                    message: format!("invalid UTF-8: {}", e),
                });
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let record: LogRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warnings.push(ParseWarning {
                    line: line_no,
                    message: format!("invalid JSON: {}", e),
                });
                continue;
            }
        };

        if let Err(e) = record.validate() {
            warnings.push(ParseWarning {
                line: line_no,
                message: format!("invalid record {}: {}", record.id, e),
            });
            continue;
        }

        if !seen.insert(record.id.clone()) {
            warnings.push(ParseWarning {
                line: line_no,
                message: format!("duplicate id {}; later line wins", record.id),
            });
        }

        records.push((line_no, record));
    }

    for warning in &warnings {
        log::warn!("{}", warning);
    }

    (records, warnings)
}

/// Encode records as log text, sorted by id, one `\n`-terminated line each.
pub fn encode(records: &[LogRecord]) -> Result<String> {
    let mut sorted: Vec<&LogRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for record in sorted {
        let line = serde_json::to_string(record)
            .with_context(|| format!("Failed to serialize record {}", record.id))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Replace `path` with `contents` atomically.
///
/// The bytes go to a temporary file in the same directory, are synced to
/// disk, then renamed over `path`. On failure `path` is untouched and the
/// temporary file is removed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents).context("Failed to write temporary log")?;
    tmp.as_file().sync_all().context("Failed to sync temporary log")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

/// Encode and atomically write a log file.
pub fn write_log(path: &Path, records: &[LogRecord]) -> Result<()> {
    let text = encode(records)?;
    write_atomic(path, text.as_bytes())
}

/// Read and decode a log file. A missing file reads as empty.
pub fn read_log(path: &Path) -> Result<(Vec<LogRecord>, Vec<ParseWarning>)> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(decode(&bytes))
}

/// Parse a log timestamp: RFC 3339, or a bare ISO 8601 time taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(normalize_time(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| normalize_time(naive.and_utc()))
}

mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_time(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s)))
    }
}

mod optional_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(t: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => serializer.serialize_str(&format_time(t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
            None => Ok(None),
        }
    }
}
