//! Permission Filter
//!
//! Visibility is decided by an [`AccessPolicy`] supplied by the host application
//! (who may view whose profile is computed elsewhere). The filter only drops
//! nodes; it never rewrites `parent_id`, re-roots orphans or repairs chains.
//! Callers wanting a coherent forest from the survivors use [`build_forest`],
//! which treats a node whose parent was filtered out as a root.

use crate::models::{build_forest, TimelineNode, TimelineTree};
use crate::services::error::HierarchyError;
use crate::services::tree_query::TreeQueryService;
use async_trait::async_trait;
use std::sync::Arc;

/// External `can_view(viewer, owner, node)` predicate
///
/// Implementations backed by a remote service should deny on failure.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_view(&self, viewer_id: &str, owner_id: &str, node_id: &str) -> bool;
}

/// Only the owner sees their nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnlyPolicy;

#[async_trait]
impl AccessPolicy for OwnerOnlyPolicy {
    async fn can_view(&self, viewer_id: &str, owner_id: &str, _node_id: &str) -> bool {
        viewer_id == owner_id
    }
}

/// Adapts a plain closure into an [`AccessPolicy`]
pub struct FnAccessPolicy<F> {
    predicate: F,
}

impl<F> FnAccessPolicy<F>
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> AccessPolicy for FnAccessPolicy<F>
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    async fn can_view(&self, viewer_id: &str, owner_id: &str, node_id: &str) -> bool {
        (self.predicate)(viewer_id, owner_id, node_id)
    }
}

#[derive(Clone)]
pub struct PermissionFilter {
    policy: Arc<dyn AccessPolicy>,
    tree: TreeQueryService,
}

impl PermissionFilter {
    pub fn new(policy: Arc<dyn AccessPolicy>, tree: TreeQueryService) -> Self {
        Self { policy, tree }
    }

    /// Keep the nodes `viewer_id` may see, in their original order
    pub async fn filter_visible(
        &self,
        nodes: Vec<TimelineNode>,
        viewer_id: &str,
    ) -> Vec<TimelineNode> {
        let total = nodes.len();
        let mut visible = Vec::with_capacity(total);
        for node in nodes {
            if self
                .policy
                .can_view(viewer_id, &node.owner_id, &node.id)
                .await
            {
                visible.push(node);
            }
        }

        tracing::debug!(
            "Viewer {} may see {} of {} node(s)",
            viewer_id,
            visible.len(),
            total
        );
        visible
    }

    /// `owner_id`'s forest as seen by `viewer_id`
    pub async fn filter_visible_tree(
        &self,
        owner_id: &str,
        viewer_id: &str,
    ) -> Result<Vec<TimelineTree>, HierarchyError> {
        let nodes = self.tree.list_nodes(owner_id).await?;
        let visible = self.filter_visible(nodes, viewer_id).await;
        Ok(build_forest(visible))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::models::{NodeMeta, NodeType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn node(id: &str, owner: &str, parent: Option<&str>) -> TimelineNode {
        let now = Utc::now();
        TimelineNode {
            id: id.to_string(),
            node_type: NodeType::Job,
            owner_id: owner.to_string(),
            parent_id: parent.map(str::to_string),
            meta: NodeMeta::new(),
            external_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn filter_with(policy: Arc<dyn AccessPolicy>) -> (PermissionFilter, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let tree = TreeQueryService::new(Arc::new(db));
        (PermissionFilter::new(policy, tree), temp_dir)
    }

    #[tokio::test]
    async fn test_owner_only_policy() {
        let (filter, _temp_dir) = filter_with(Arc::new(OwnerOnlyPolicy)).await;
        let nodes = vec![node("a", "alice", None), node("b", "bob", None)];

        let visible = filter.filter_visible(nodes, "alice").await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "a");
    }

    #[tokio::test]
    async fn test_filter_leaves_links_untouched() {
        let policy = FnAccessPolicy::new(|_viewer: &str, _owner: &str, node_id: &str| {
            node_id != "middle"
        });
        let (filter, _temp_dir) = filter_with(Arc::new(policy)).await;
        let nodes = vec![
            node("top", "alice", None),
            node("middle", "alice", Some("top")),
            node("bottom", "alice", Some("middle")),
        ];

        let visible = filter.filter_visible(nodes, "bob").await;
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].id, "bottom");
        assert_eq!(visible[1].parent_id.as_deref(), Some("middle"));

        let forest = build_forest(visible);
        assert_eq!(forest.len(), 2);
    }
}
