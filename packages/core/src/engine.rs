//! Hierarchy Engine facade
//!
//! Opens the database described by a [`HierarchyConfig`] and wires every
//! service onto it, sharing one event channel.
//!
//! # Examples
//!
//! ```no_run
//! use careerline_core::{HierarchyConfig, HierarchyEngine, NewTimelineNode, NodeType};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = HierarchyEngine::open(HierarchyConfig::from_env()?).await?;
//! let job = engine
//!     .nodes()
//!     .create_node(NewTimelineNode::new(NodeType::Job, "user-1", json!({"title": "Engineer"})))
//!     .await?;
//! let children = engine.tree().get_children(&job.id).await?;
//! assert!(children.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::config::HierarchyConfig;
use crate::db::{DatabaseService, HierarchyEvent};
use crate::services::{
    AccessPolicy, HierarchyError, InsightService, NodeService, OwnerOnlyPolicy, PermissionFilter,
    TreeQueryService,
};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct HierarchyEngine {
    db: Arc<DatabaseService>,
    nodes: NodeService,
    tree: TreeQueryService,
    permissions: PermissionFilter,
    insights: InsightService,
    event_tx: broadcast::Sender<HierarchyEvent>,
}

impl HierarchyEngine {
    /// Open with the owner-only access policy
    pub async fn open(config: HierarchyConfig) -> Result<Self, HierarchyError> {
        Self::open_with_policy(config, Arc::new(OwnerOnlyPolicy)).await
    }

    pub async fn open_with_policy(
        config: HierarchyConfig,
        policy: Arc<dyn AccessPolicy>,
    ) -> Result<Self, HierarchyError> {
        let db = Arc::new(
            DatabaseService::with_busy_timeout(
                config.database_path.clone(),
                config.busy_timeout_ms,
            )
            .await?,
        );
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        let nodes = NodeService::new(db.clone())
            .with_rules(config.hierarchy_rules())
            .with_event_sender(event_tx.clone());
        let tree = TreeQueryService::new(db.clone());
        let permissions = PermissionFilter::new(policy.clone(), tree.clone());
        let insights = InsightService::new(db.clone(), policy, event_tx.clone());

        tracing::info!(
            "Hierarchy engine ready at {} (parentable: {:?})",
            db.db_path.display(),
            config.parentable_types
        );

        Ok(Self {
            db,
            nodes,
            tree,
            permissions,
            insights,
            event_tx,
        })
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn nodes(&self) -> &NodeService {
        &self.nodes
    }

    pub fn tree(&self) -> &TreeQueryService {
        &self.tree
    }

    pub fn permissions(&self) -> &PermissionFilter {
        &self.permissions
    }

    pub fn insights(&self) -> &InsightService {
        &self.insights
    }

    /// Node and insight events, after commit
    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.event_tx.subscribe()
    }
}
