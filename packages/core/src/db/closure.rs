//! Closure Maintainer
//!
//! Keeps `node_closure` equal to the transitive closure of the `parent_id`
//! relation. Every method here is meant to run on the connection of the write
//! transaction that performs the structural change it derives from.
//!
//! Invariants maintained:
//! - one self row `(id, id, 0)` per node
//! - `(a, d, k)` exists iff `d` is reachable from `a` through `k` parent links
//!
//! Costs are proportional to subtree size times tree depth. Career trees are a
//! handful of levels deep, so the cross join in `rewrite_subtree_on_move` stays small.

use crate::db::node_store::{stage_ids, STAGED_IDS};
use crate::db::DatabaseError;
use crate::models::{ClosureEntry, TimelineNode};
use libsql::params::Params;
use libsql::{Connection, Value};
use std::collections::{HashMap, HashSet};

/// Row counts produced by a subtree move, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub subtree_size: usize,
    pub rows_removed: u64,
    pub rows_inserted: u64,
}

/// Closure table writes and id-level reads bound to one connection
pub struct ClosureMaintainer<'c> {
    conn: &'c Connection,
}

impl<'c> ClosureMaintainer<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Index a freshly inserted node
    ///
    /// Always writes the self row. With a parent, copies the parent's ancestor
    /// chain (including the parent's own self row) one level deeper.
    pub async fn insert_closures_for_new_node(
        &self,
        node_id: &str,
        parent_id: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let mut inserted = self
            .conn
            .execute(
                "INSERT INTO node_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, 0)",
                [node_id, node_id],
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to insert self closure row", e))?;

        if let Some(parent_id) = parent_id {
            inserted += self
                .conn
                .execute(
                    "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
                     SELECT ancestor_id, ?, depth + 1 FROM node_closure WHERE descendant_id = ?",
                    [node_id, parent_id],
                )
                .await
                .map_err(|e| DatabaseError::statement("Failed to insert inherited closure rows", e))?;
        }

        Ok(inserted)
    }

    /// Delete every closure row touching any id in `node_ids`
    pub async fn remove_closures_for_subtree(
        &self,
        node_ids: &[String],
    ) -> Result<u64, DatabaseError> {
        if node_ids.is_empty() {
            return Ok(0);
        }

        stage_ids(self.conn, node_ids).await?;
        self.conn
            .execute(
                &format!(
                    "DELETE FROM node_closure
                     WHERE ancestor_id IN (SELECT id FROM {staged})
                        OR descendant_id IN (SELECT id FROM {staged})",
                    staged = STAGED_IDS
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to remove closure rows", e))
    }

    /// Re-link the subtree rooted at `root_id` under `new_parent_id`
    ///
    /// 1. Rows linking subtree members to ancestors outside the subtree (the old
    ///    ancestor chain of `root_id`) are removed.
    /// 2. For every ancestor `a` of the new parent at depth `p` (the parent itself at 0)
    ///    and every subtree member `s` at depth `k` below `root_id`, `(a, s, p + k + 1)`
    ///    is inserted. Rows internal to the subtree are left untouched.
    ///
    /// `new_parent_id = None` detaches the subtree so that `root_id` becomes a root.
    pub async fn rewrite_subtree_on_move(
        &self,
        root_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<MoveStats, DatabaseError> {
        let subtree = self.subtree_ids(root_id).await?;
        if subtree.is_empty() {
            return Err(DatabaseError::sql_execution(format!(
                "Node {} has no closure rows",
                root_id
            )));
        }

        stage_ids(self.conn, &subtree).await?;
        let rows_removed = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM node_closure
                     WHERE descendant_id IN (SELECT id FROM {staged})
                       AND ancestor_id NOT IN (SELECT id FROM {staged})",
                    staged = STAGED_IDS
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to detach subtree closure rows", e))?;

        let rows_inserted = match new_parent_id {
            Some(parent_id) => self
                .conn
                .execute(
                    "INSERT INTO node_closure (ancestor_id, descendant_id, depth)
                     SELECT p.ancestor_id, c.descendant_id, p.depth + c.depth + 1
                     FROM node_closure p, node_closure c
                     WHERE p.descendant_id = ? AND c.ancestor_id = ?",
                    [parent_id, root_id],
                )
                .await
                .map_err(|e| DatabaseError::statement("Failed to attach subtree closure rows", e))?,
            None => 0,
        };

        Ok(MoveStats {
            subtree_size: subtree.len(),
            rows_removed,
            rows_inserted,
        })
    }

    /// `root_id` and all of its descendants, shallowest first
    pub async fn subtree_ids(&self, root_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT descendant_id FROM node_closure WHERE ancestor_id = ?
                 ORDER BY depth ASC, descendant_id ASC",
                [root_id],
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to query subtree ids", e))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(DatabaseError::LibsqlError)?
        {
            ids.push(row.get::<String>(0).map_err(DatabaseError::LibsqlError)?);
        }
        Ok(ids)
    }

    /// Whether `candidate` is a strict descendant of `ancestor_id`
    pub async fn is_strict_descendant(
        &self,
        ancestor_id: &str,
        candidate: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM node_closure WHERE ancestor_id = ? AND descendant_id = ? AND depth > 0",
                [ancestor_id, candidate],
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to query closure row", e))?;

        let found = rows
            .next()
            .await
            .map_err(DatabaseError::LibsqlError)?
            .is_some();
        Ok(found)
    }

    /// Every closure row whose descendant is owned by `owner_id`, sorted
    pub async fn entries_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ClosureEntry>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.ancestor_id, c.descendant_id, c.depth FROM node_closure c
                 JOIN timeline_nodes n ON n.id = c.descendant_id
                 WHERE n.owner_id = ?
                 ORDER BY c.ancestor_id ASC, c.descendant_id ASC",
                [owner_id],
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to query closure rows", e))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(DatabaseError::LibsqlError)?
        {
            entries.push(ClosureEntry {
                ancestor_id: row.get(0).map_err(DatabaseError::LibsqlError)?,
                descendant_id: row.get(1).map_err(DatabaseError::LibsqlError)?,
                depth: row.get(2).map_err(DatabaseError::LibsqlError)?,
            });
        }
        Ok(entries)
    }

    /// Number of closure rows whose ancestor or descendant has no node row
    ///
    /// Such rows belong to no owner, so [`Self::entries_for_owner`] never sees them.
    pub async fn count_dangling_entries(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM node_closure c
                 WHERE NOT EXISTS (SELECT 1 FROM timeline_nodes n WHERE n.id = c.ancestor_id)
                    OR NOT EXISTS (SELECT 1 FROM timeline_nodes n WHERE n.id = c.descendant_id)",
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to count dangling closure rows", e))?;

        match rows.next().await.map_err(DatabaseError::LibsqlError)? {
            Some(row) => row.get(0).map_err(DatabaseError::LibsqlError),
            None => Ok(0),
        }
    }

    /// Insert a precomputed set of closure rows
    pub async fn insert_entries(&self, entries: &[ClosureEntry]) -> Result<u64, DatabaseError> {
        let mut inserted = 0;
        for entry in entries {
            inserted += self
                .conn
                .execute(
                    "INSERT INTO node_closure (ancestor_id, descendant_id, depth) VALUES (?, ?, ?)",
                    Params::Positional(vec![
                        Value::Text(entry.ancestor_id.clone()),
                        Value::Text(entry.descendant_id.clone()),
                        Value::Integer(entry.depth),
                    ]),
                )
                .await
                .map_err(|e| {
                    DatabaseError::statement(
                        format!(
                            "Failed to insert closure row ({}, {})",
                            entry.ancestor_id, entry.descendant_id
                        ),
                        e,
                    )
                })?;
        }
        Ok(inserted)
    }
}

/// Derive the closure rows implied by the parent pointers of `nodes`.
///
/// Parents outside `nodes` are ignored, so pass a complete per-owner node list.
/// A parent chain that loops back on itself stops at the first repeated id.
/// Output is sorted like [`ClosureMaintainer::entries_for_owner`].
pub fn expected_closure(nodes: &[TimelineNode]) -> Vec<ClosureEntry> {
    let parents: HashMap<&str, Option<&str>> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.parent_id.as_deref()))
        .collect();

    let mut entries = Vec::new();
    for node in nodes {
        entries.push(ClosureEntry::self_entry(node.id.clone()));

        let mut seen: HashSet<&str> = HashSet::from([node.id.as_str()]);
        let mut depth = 1;
        let mut current = node.parent_id.as_deref();
        while let Some(ancestor) = current {
            if !parents.contains_key(ancestor) || !seen.insert(ancestor) {
                break;
            }
            entries.push(ClosureEntry::new(ancestor, node.id.clone(), depth));
            depth += 1;
            current = parents.get(ancestor).copied().flatten();
        }
    }

    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeMeta, NodeType};
    use chrono::Utc;

    fn node(id: &str, parent: Option<&str>) -> TimelineNode {
        let now = Utc::now();
        TimelineNode {
            id: id.to_string(),
            node_type: NodeType::Job,
            owner_id: "owner".to_string(),
            parent_id: parent.map(str::to_string),
            meta: NodeMeta::new(),
            external_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expected_closure_for_chain() {
        let nodes = vec![node("a", None), node("b", Some("a")), node("c", Some("b"))];
        let entries = expected_closure(&nodes);

        assert_eq!(entries.len(), 6);
        assert!(entries.contains(&ClosureEntry::new("a", "c", 2)));
        assert!(entries.contains(&ClosureEntry::new("b", "c", 1)));
        assert!(entries.contains(&ClosureEntry::self_entry("c")));
        assert!(!entries.contains(&ClosureEntry::new("c", "a", 2)));
    }

    #[test]
    fn test_expected_closure_stops_on_loops_and_missing_parents() {
        let nodes = vec![node("x", Some("y")), node("y", Some("x")), node("z", Some("gone"))];
        let entries = expected_closure(&nodes);

        assert!(entries.contains(&ClosureEntry::new("y", "x", 1)));
        assert!(entries.contains(&ClosureEntry::new("x", "y", 1)));
        assert!(!entries.iter().any(|e| e.ancestor_id == "gone"));
        assert_eq!(entries.iter().filter(|e| e.depth == 0).count(), 3);
    }
}
