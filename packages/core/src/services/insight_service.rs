//! Insight Attachment Service
//!
//! Insights follow the rules of the node they hang off:
//!
//! - writes (create, update, delete) require the caller to own the node
//! - reads require the access policy to let the viewer see the node; a node the
//!   viewer may not see is reported as `NotFound`, never `Forbidden`
//!
//! Deleting a node removes its insights inside the node delete transaction
//! (see `NodeService::delete_node`), so this service has no cascade of its own.

use crate::db::{DatabaseService, HierarchyEvent, InsightStore, NodeStore};
use crate::models::{normalize_content, Insight, NewInsight, TimelineNode};
use crate::services::error::HierarchyError;
use crate::services::permission::AccessPolicy;
use chrono::Utc;
use libsql::Connection;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct InsightService {
    db: Arc<DatabaseService>,
    policy: Arc<dyn AccessPolicy>,
    event_tx: broadcast::Sender<HierarchyEvent>,
}

impl InsightService {
    pub fn new(
        db: Arc<DatabaseService>,
        policy: Arc<dyn AccessPolicy>,
        event_tx: broadcast::Sender<HierarchyEvent>,
    ) -> Self {
        Self {
            db,
            policy,
            event_tx,
        }
    }

    fn emit_event(&self, event: HierarchyEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Attach an insight; the author must own the node
    pub async fn create_insight(&self, params: NewInsight) -> Result<Insight, HierarchyError> {
        let insight = params.into_insight()?;

        let conn = self.db.begin_write().await?;
        let outcome = Self::create_in_tx(&conn, &insight).await;
        DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!("Attached insight {} to node {}", insight.id, insight.node_id);
        self.emit_event(HierarchyEvent::InsightCreated {
            insight: insight.clone(),
        });
        Ok(insight)
    }

    async fn create_in_tx(conn: &Connection, insight: &Insight) -> Result<(), HierarchyError> {
        let node = load_node(conn, &insight.node_id).await?;
        if node.owner_id != insight.author_id {
            return Err(HierarchyError::forbidden_node(&node.id, &insight.author_id));
        }
        Ok(InsightStore::new(conn).insert(insight).await?)
    }

    /// Insights of `node_id`, oldest first
    pub async fn list_insights(
        &self,
        node_id: &str,
        viewer_id: &str,
    ) -> Result<Vec<Insight>, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        self.ensure_visible(&conn, node_id, viewer_id).await?;
        Ok(InsightStore::new(&conn).list_for_node(node_id).await?)
    }

    pub async fn get_insight(&self, id: &str, viewer_id: &str) -> Result<Insight, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        let insight = InsightStore::new(&conn)
            .get(id)
            .await?
            .ok_or_else(|| HierarchyError::insight_not_found(id))?;

        self.ensure_visible(&conn, &insight.node_id, viewer_id)
            .await
            .map_err(|e| hide_node_behind_insight(e, id))?;
        Ok(insight)
    }

    /// Replace the content of an insight; the actor must own the node
    pub async fn update_insight(
        &self,
        id: &str,
        content: &str,
        actor_id: &str,
    ) -> Result<Insight, HierarchyError> {
        let content = normalize_content(content)?;

        let conn = self.db.begin_write().await?;
        let outcome = Self::update_in_tx(&conn, id, content, actor_id).await;
        let insight = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!("Updated insight {}", insight.id);
        self.emit_event(HierarchyEvent::InsightUpdated {
            insight: insight.clone(),
        });
        Ok(insight)
    }

    async fn update_in_tx(
        conn: &Connection,
        id: &str,
        content: String,
        actor_id: &str,
    ) -> Result<Insight, HierarchyError> {
        let mut insight = load_owned_insight(conn, id, actor_id).await?;

        let now = Utc::now();
        let changed = InsightStore::new(conn)
            .update_content(id, &content, &now)
            .await?;
        if changed == 0 {
            return Err(HierarchyError::conflict(format!(
                "insight {} changed during update",
                id
            )));
        }

        insight.content = content;
        insight.updated_at = now;
        Ok(insight)
    }

    /// Remove an insight; the actor must own the node
    pub async fn delete_insight(&self, id: &str, actor_id: &str) -> Result<(), HierarchyError> {
        let conn = self.db.begin_write().await?;
        let outcome = Self::delete_in_tx(&conn, id, actor_id).await;
        let node_id = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!("Deleted insight {} from node {}", id, node_id);
        self.emit_event(HierarchyEvent::InsightDeleted {
            insight_id: id.to_string(),
            node_id,
        });
        Ok(())
    }

    async fn delete_in_tx(
        conn: &Connection,
        id: &str,
        actor_id: &str,
    ) -> Result<String, HierarchyError> {
        let insight = load_owned_insight(conn, id, actor_id).await?;
        let removed = InsightStore::new(conn)
            .delete(id)
            .await?;
        if removed == 0 {
            return Err(HierarchyError::conflict(format!(
                "insight {} vanished during delete",
                id
            )));
        }
        Ok(insight.node_id)
    }

    async fn ensure_visible(
        &self,
        conn: &Connection,
        node_id: &str,
        viewer_id: &str,
    ) -> Result<TimelineNode, HierarchyError> {
        let node = load_node(conn, node_id).await?;
        if !self.policy.can_view(viewer_id, &node.owner_id, &node.id).await {
            tracing::debug!("Viewer {} may not see node {}", viewer_id, node_id);
            return Err(HierarchyError::node_not_found(node_id));
        }
        Ok(node)
    }
}

/// An invisible node reads as a missing insight; storage failures pass through
fn hide_node_behind_insight(err: HierarchyError, insight_id: &str) -> HierarchyError {
    if err.is_not_found() {
        HierarchyError::insight_not_found(insight_id)
    } else {
        err
    }
}

async fn load_node(conn: &Connection, node_id: &str) -> Result<TimelineNode, HierarchyError> {
    NodeStore::new(conn)
        .get_node(node_id)
        .await?
        .ok_or_else(|| HierarchyError::node_not_found(node_id))
}

/// Load an insight and check that `actor_id` owns its node
async fn load_owned_insight(
    conn: &Connection,
    id: &str,
    actor_id: &str,
) -> Result<Insight, HierarchyError> {
    let insight = InsightStore::new(conn)
        .get(id)
        .await?
        .ok_or_else(|| HierarchyError::insight_not_found(id))?;
    let node = load_node(conn, &insight.node_id).await?;
    if node.owner_id != actor_id {
        return Err(HierarchyError::forbidden_insight(id, actor_id));
    }
    Ok(insight)
}
