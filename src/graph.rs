//! Dependency graph operations on the store.
//!
//! Edges point from the dependent issue to the one it depends on. The
//! parent subgraph is a forest; blocks edges may form cycles, in which case
//! every issue on the cycle stays blocked.

use crate::id::generate_id;
use crate::store::{Store, StoreError};
use crate::types::{Edge, EdgeKind, Filter, Issue, Status, ValidationError};
use eyre::{Context, Result};
use std::collections::HashSet;

/// Result of moving issues between collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveOutcome {
    /// `(old_id, new_id)` for every renamed issue, the moved root first.
    pub renamed: Vec<(String, String)>,
}

impl MoveOutcome {
    /// New id of a moved issue.
    pub fn new_id(&self, old_id: &str) -> Option<&str> {
        self.renamed
            .iter()
            .find(|(old, _)| old == old_id)
            .map(|(_, new)| new.as_str())
    }
}

impl Store {
    /// Add an edge between issues.
    ///
    /// Adding an edge that already exists returns it unchanged. A new parent
    /// edge replaces the issue's previous parent.
    pub fn add_edge(&mut self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<Edge> {
        self.link(from_id, to_id, kind, false)
    }

    /// Like [`Store::add_edge`], but refuses to replace an existing parent.
    pub fn add_edge_strict(&mut self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<Edge> {
        self.link(from_id, to_id, kind, true)
    }

    fn link(&mut self, from_id: &str, to_id: &str, kind: EdgeKind, strict: bool) -> Result<Edge> {
        // No self-referential edges
        if from_id == to_id {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::SelfReferentialEdge(
                from_id.to_string()
            ))));
        }

        // Both issues must exist
        self.require(from_id)?;
        self.require(to_id)?;

        if let Some(edge) = self.storage.get_edge(from_id, to_id, kind)? {
            return Ok(edge);
        }

        if kind == EdgeKind::Parent {
            return self.set_parent(from_id, Some(to_id), strict)?.ok_or_else(|| {
                eyre::eyre!("parent edge {} -> {} missing after insert", from_id, to_id)
            });
        }

        let now = self.now();
        let edge = Edge {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            kind,
            created_at: now,
        };

        let tx = self.storage.transaction()?;
        self.storage.insert_edge(&edge)?;
        self.storage.touch(from_id, &now)?;
        tx.commit().context("Failed to persist edge")?;

        log::debug!("linked {} -> {} ({})", from_id, to_id, kind);
        Ok(edge)
    }

    /// Remove an edge; returns whether it existed.
    pub fn remove_edge(&mut self, from_id: &str, to_id: &str, kind: EdgeKind) -> Result<bool> {
        let now = self.now();

        let tx = self.storage.transaction()?;
        let removed = self.storage.delete_edge(from_id, to_id, kind)?;
        if removed {
            self.storage.touch(from_id, &now)?;
        }
        tx.commit().context("Failed to persist edge removal")?;

        Ok(removed)
    }

    /// Set or clear the parent of `child`.
    ///
    /// The old parent edge is deleted and the new one inserted in a single
    /// transaction. With `strict`, an existing different parent is an error.
    /// Returns the parent edge now in place, if any.
    pub fn set_parent(&mut self, child_id: &str, parent_id: Option<&str>, strict: bool) -> Result<Option<Edge>> {
        self.require(child_id)?;
        let current = self.storage.parent_of(child_id)?;

        if let Some(parent_id) = parent_id {
            if parent_id == child_id {
                return Err(eyre::eyre!(StoreError::Validation(ValidationError::SelfReferentialEdge(
                    child_id.to_string()
                ))));
            }
            self.require(parent_id)?;

            if current.as_deref() == Some(parent_id) {
                return self.storage.get_edge(child_id, parent_id, EdgeKind::Parent);
            }
            if strict && let Some(existing) = &current {
                return Err(eyre::eyre!(StoreError::Validation(ValidationError::ParentAlreadySet {
                    child: child_id.to_string(),
                    parent: existing.clone(),
                })));
            }
            if self.storage.is_ancestor(child_id, parent_id)? {
                return Err(eyre::eyre!(StoreError::Cycle {
                    from: child_id.to_string(),
                    to: parent_id.to_string(),
                }));
            }
        } else if current.is_none() {
            return Ok(None);
        }

        let now = self.now();
        let edge = parent_id.map(|parent_id| Edge {
            from_id: child_id.to_string(),
            to_id: parent_id.to_string(),
            kind: EdgeKind::Parent,
            created_at: now,
        });

        let tx = self.storage.transaction()?;
        self.storage.delete_parent_edge(child_id)?;
        if let Some(edge) = &edge {
            self.storage.insert_edge(edge)?;
        }
        self.storage.touch(child_id, &now)?;
        tx.commit().context("Failed to persist parent change")?;

        log::debug!("parent of {}: {:?} -> {:?}", child_id, current, parent_id);
        Ok(edge)
    }

    /// Move `id` under `parent`, or to the top level with `None`.
    pub fn reparent(&mut self, id: &str, parent_id: Option<&str>) -> Result<Option<Edge>> {
        self.set_parent(id, parent_id, false)
    }

    pub fn parent(&self, id: &str) -> Result<Option<String>> {
        self.storage.parent_of(id)
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id.to_string()]);
        let mut current = self.storage.parent_of(id)?;

        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            current = self.storage.parent_of(&parent)?;
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Direct children of `id`, oldest first.
    pub fn children(&self, id: &str) -> Result<Vec<Issue>> {
        self.storage.children_of(id)
    }

    pub fn outgoing_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.storage.edges_from(id)
    }

    pub fn incoming_edges(&self, id: &str) -> Result<Vec<Edge>> {
        self.storage.edges_to(id)
    }

    /// Issues that directly block `id` and are still open.
    pub fn blockers(&self, id: &str) -> Result<Vec<Issue>> {
        Ok(self
            .storage
            .blockers_of(id)?
            .into_iter()
            .filter(|issue| issue.status != Status::Closed)
            .collect())
    }

    /// Whether `id` is blocked by the graph, directly or through an ancestor.
    pub fn is_blocked(&self, id: &str) -> Result<bool> {
        self.require(id)?;
        Ok(self.storage.blocked_ids()?.contains(id))
    }

    /// Open or in-progress issues with nothing blocking them.
    pub fn ready(&self, collection_id: Option<&str>) -> Result<Vec<Issue>> {
        let mut filter = Filter::new().status(Status::Open).status(Status::InProgress);
        if let Some(collection_id) = collection_id {
            filter = filter.collection(collection_id);
        }

        let blocked = self.storage.blocked_ids()?;
        Ok(self
            .storage
            .list_issues(&filter)?
            .into_iter()
            .filter(|issue| !blocked.contains(&issue.id))
            .collect())
    }

    /// Non-closed issues that are blocked by the graph or marked blocked.
    pub fn blocked(&self, collection_id: Option<&str>) -> Result<Vec<Issue>> {
        let mut filter = Filter::new().not_closed();
        if let Some(collection_id) = collection_id {
            filter = filter.collection(collection_id);
        }

        let blocked = self.storage.blocked_ids()?;
        Ok(self
            .storage
            .list_issues(&filter)?
            .into_iter()
            .filter(|issue| issue.status == Status::Blocked || blocked.contains(&issue.id))
            .collect())
    }

    /// Move an issue (and optionally its subtree) into another collection.
    ///
    /// Every moved issue gets a fresh id under the target prefix; edges and
    /// comments follow the new ids. Subtree members already in the target
    /// keep their ids. All renames commit together or not at all.
    pub fn move_issue(&mut self, id: &str, target_collection_id: &str, with_children: bool) -> Result<MoveOutcome> {
        let issue = self.require(id)?;
        let target = self.require_collection(target_collection_id)?;

        if issue.collection_id == target.id {
            return Err(eyre::eyre!(StoreError::Validation(ValidationError::SameCollection {
                id: id.to_string(),
                collection_id: target.id,
            })));
        }

        let mut members = vec![issue];
        if with_children {
            for descendant in self.storage.descendants(id)? {
                let child = self.require(&descendant)?;
                if child.collection_id != target.id {
                    members.push(child);
                }
            }
        }

        let mut taken = self.storage.ids_with_prefix(&target.prefix)?;
        let now = self.now();
        let mut outcome = MoveOutcome::default();

        let tx = self.storage.transaction()?;
        for member in &members {
            let new_id = generate_id(&member.title, &target.prefix, &taken).map_err(|e| eyre::eyre!(e))?;
            self.storage.rename_issue(&member.id, &new_id, &target.id, &now)?;
            taken.insert(new_id.clone());
            outcome.renamed.push((member.id.clone(), new_id));
        }
        tx.commit().context("Failed to persist move")?;

        log::info!(
            "moved {} issue(s) from {} into {}",
            outcome.renamed.len(),
            id,
            target.id
        );
        Ok(outcome)
    }
}
