//! Tree Query Service
//!
//! Read side of the hierarchy. Point queries (children, ancestors, descendants)
//! are single joins against the closure index; whole-tree reads fetch the
//! owner's flat node list once and nest it in memory with [`build_forest`].
//!
//! Each call opens its own connection. In WAL mode readers never wait on the
//! writer and always see the last committed transaction.

use crate::db::{expected_closure, ClosureMaintainer, DatabaseService, NodeStore};
use crate::models::{build_forest, ClosureEntry, TimelineNode, TimelineTree};
use crate::services::error::HierarchyError;
use libsql::Connection;
use std::sync::Arc;

#[derive(Clone)]
pub struct TreeQueryService {
    db: Arc<DatabaseService>,
}

impl TreeQueryService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    async fn connect(&self) -> Result<Connection, HierarchyError> {
        Ok(self.db.connect_with_timeout().await?)
    }

    /// Distinguish "no rows" from "no such node"
    async fn ensure_exists(store: &NodeStore<'_>, node_id: &str) -> Result<(), HierarchyError> {
        match store.get_node(node_id).await? {
            Some(_) => Ok(()),
            None => Err(HierarchyError::node_not_found(node_id)),
        }
    }

    /// Direct children, oldest first
    pub async fn get_children(&self, node_id: &str) -> Result<Vec<TimelineNode>, HierarchyError> {
        let conn = self.connect().await?;
        let store = NodeStore::new(&conn);
        let children = store.children_of(node_id).await?;
        if children.is_empty() {
            Self::ensure_exists(&store, node_id).await?;
        }
        Ok(children)
    }

    /// Every strict descendant, shallowest first
    pub async fn get_descendants(
        &self,
        node_id: &str,
    ) -> Result<Vec<TimelineNode>, HierarchyError> {
        let conn = self.connect().await?;
        let store = NodeStore::new(&conn);
        let descendants = store.descendants_of(node_id).await?;
        if descendants.is_empty() {
            Self::ensure_exists(&store, node_id).await?;
        }
        Ok(descendants)
    }

    /// Every strict ancestor, nearest parent first
    pub async fn get_ancestors(&self, node_id: &str) -> Result<Vec<TimelineNode>, HierarchyError> {
        let conn = self.connect().await?;
        let store = NodeStore::new(&conn);
        let ancestors = store.ancestors_of(node_id).await?;
        if ancestors.is_empty() {
            Self::ensure_exists(&store, node_id).await?;
        }
        Ok(ancestors)
    }

    /// Parentless nodes of `owner_id`
    pub async fn get_roots(&self, owner_id: &str) -> Result<Vec<TimelineNode>, HierarchyError> {
        let conn = self.connect().await?;
        Ok(NodeStore::new(&conn).roots(owner_id).await?)
    }

    /// Flat list of every node `owner_id` owns, oldest first
    pub async fn list_nodes(&self, owner_id: &str) -> Result<Vec<TimelineNode>, HierarchyError> {
        let conn = self.connect().await?;
        Ok(NodeStore::new(&conn).list_by_owner(owner_id).await?)
    }

    /// The owner's full forest, built in one pass over the flat list
    pub async fn build_tree(&self, owner_id: &str) -> Result<Vec<TimelineTree>, HierarchyError> {
        let nodes = self.list_nodes(owner_id).await?;
        Ok(build_forest(nodes))
    }

    /// Tree rooted at `node_id`
    pub async fn get_subtree(&self, node_id: &str) -> Result<TimelineTree, HierarchyError> {
        let conn = self.connect().await?;
        let nodes = NodeStore::new(&conn).subtree_of(node_id).await?;

        // subtree_of lists the root first; its parent is not in the set
        build_forest(nodes)
            .into_iter()
            .next()
            .ok_or_else(|| HierarchyError::node_not_found(node_id))
    }

    /// Stored closure rows for `owner_id`'s nodes, sorted by (ancestor, descendant)
    pub async fn closure_snapshot(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ClosureEntry>, HierarchyError> {
        let conn = self.connect().await?;
        Ok(ClosureMaintainer::new(&conn)
            .entries_for_owner(owner_id)
            .await?)
    }

    /// Whether the stored closure rows equal the closure derived from parent pointers
    ///
    /// Also fails when any closure row points at a node that no longer exists;
    /// those rows have no owner, so the check is store-wide.
    pub async fn verify_closure(&self, owner_id: &str) -> Result<bool, HierarchyError> {
        let conn = self.connect().await?;
        let nodes = NodeStore::new(&conn).list_by_owner(owner_id).await?;
        let closure = ClosureMaintainer::new(&conn);

        let dangling = closure.count_dangling_entries().await?;
        if dangling > 0 {
            tracing::warn!(
                "Closure index has {} row(s) referencing missing nodes",
                dangling
            );
            return Ok(false);
        }

        let stored = closure.entries_for_owner(owner_id).await?;
        let expected = expected_closure(&nodes);

        if stored != expected {
            tracing::warn!(
                "Closure index for owner {} is out of sync: {} stored row(s), {} expected",
                owner_id,
                stored.len(),
                expected.len()
            );
            return Ok(false);
        }
        Ok(true)
    }
}
