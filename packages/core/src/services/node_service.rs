//! Node Service - Structural Mutations
//!
//! This module provides the write side of the hierarchy engine:
//!
//! - `create_node` - insert a node and index it in the closure table
//! - `update_node` - field-by-field meta patch with full re-validation
//! - `delete_node` - cascade a subtree with its closure rows and insights
//! - `move_node` - re-parent a subtree and rewrite its closure rows
//! - `upsert_by_external_id` - idempotent create-or-refresh for imported nodes
//!
//! # Transactions
//!
//! Every mutation runs on a connection returned by `DatabaseService::begin_write`
//! (`BEGIN IMMEDIATE`). Ownership checks, hierarchy validation, the node row
//! write and the closure maintenance all happen on that connection, and
//! `DatabaseService::finish_transaction` commits or rolls back the whole unit.
//! A `move_node` therefore serialises against a `create_node` under the moved
//! subtree: whichever takes the write lock second sees the first one's rows.
//!
//! # Source of truth
//!
//! `parent_id` defines the tree. Closure rows are derived from it and are only
//! ever written in the same transaction as the parent pointer they index.
//! `rebuild_closures` re-derives them from scratch.

use crate::behaviors::{meta_from_value, BuiltinMetaSchema, HierarchyRules, MetaSchemaValidator};
use crate::db::{
    expected_closure, ClosureMaintainer, DatabaseService, HierarchyEvent, InsightStore, NodeStore,
    DEFAULT_EVENT_CHANNEL_CAPACITY,
};
use crate::models::{
    DeleteResult, MetaPatch, NewTimelineNode, NodeMeta, TimelineNode, ValidationError,
};
use crate::services::error::HierarchyError;
use crate::services::hierarchy_validator::HierarchyValidator;
use chrono::Utc;
use libsql::Connection;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What an upsert did to the store
enum Upserted {
    Created,
    Updated,
    Unchanged,
}

/// Write-side service for timeline nodes
///
/// Cheap to clone: every field is an `Arc` or a channel handle.
#[derive(Clone)]
pub struct NodeService {
    db: Arc<DatabaseService>,
    validator: HierarchyValidator,
    schema: Arc<dyn MetaSchemaValidator>,
    event_tx: broadcast::Sender<HierarchyEvent>,
}

impl NodeService {
    /// Create a NodeService with the default nesting matrix and built-in meta schema
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use careerline_core::db::DatabaseService;
    /// # use careerline_core::services::NodeService;
    /// # use std::sync::Arc;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Arc::new(DatabaseService::new("./data/careerline.db".into()).await?);
    /// let service = NodeService::new(db);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(db: Arc<DatabaseService>) -> Self {
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            validator: HierarchyValidator::default(),
            schema: Arc::new(BuiltinMetaSchema::new()),
            event_tx,
        }
    }

    pub fn with_rules(mut self, rules: HierarchyRules) -> Self {
        self.validator = HierarchyValidator::new(rules);
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn MetaSchemaValidator>) -> Self {
        self.schema = schema;
        self
    }

    /// Publish on an existing channel (shared with other services)
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<HierarchyEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    pub fn rules(&self) -> &HierarchyRules {
        self.validator.rules()
    }

    /// Subscribe to domain events
    ///
    /// Events are sent only after the transaction that produced them committed.
    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors: having no subscriber is normal.
    fn emit_event(&self, event: HierarchyEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Create a node, optionally under a parent
    ///
    /// Meta is validated before the transaction opens. Inside it the parent is
    /// loaded and checked (exists, same owner, parentable type), then the node row
    /// and its closure rows (self + inherited ancestor chain) are written.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed meta
    /// - `NotFound` when the parent does not exist
    /// - `Forbidden` when the parent belongs to another user
    /// - `HierarchyViolation` when the parent's type cannot have children
    pub async fn create_node(&self, params: NewTimelineNode) -> Result<TimelineNode, HierarchyError> {
        let meta = meta_from_value(params.meta.clone())?;
        self.schema.validate(params.node_type, &meta)?;

        let conn = self.db.begin_write().await?;
        let outcome = self.create_in_tx(&conn, params, meta).await;
        let node = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!(
            "Created {} node {} (owner {}, parent {:?})",
            node.node_type,
            node.id,
            node.owner_id,
            node.parent_id
        );
        self.emit_event(HierarchyEvent::NodeCreated { node: node.clone() });
        Ok(node)
    }

    async fn create_in_tx(
        &self,
        conn: &Connection,
        params: NewTimelineNode,
        meta: NodeMeta,
    ) -> Result<TimelineNode, HierarchyError> {
        let store = NodeStore::new(conn);

        if let Some(parent_id) = params.parent_id.as_deref() {
            let parent = store
                .get_node(parent_id)
                .await?
                .ok_or_else(|| HierarchyError::node_not_found(parent_id))?;
            if parent.owner_id != params.owner_id {
                return Err(HierarchyError::forbidden_node(parent_id, &params.owner_id));
            }
            self.validator.validate_new_edge(parent.node_type)?;
        }

        let node = params.into_node(meta);
        store.insert_node(&node).await?;
        ClosureMaintainer::new(conn)
            .insert_closures_for_new_node(&node.id, node.parent_id.as_deref())
            .await?;

        Ok(node)
    }

    /// Create or refresh the node `params.owner_id` keyed with `params.external_id`
    ///
    /// The first call for a key creates the node exactly like `create_node`.
    /// Later calls replace its meta in full and leave it where it sits in the
    /// tree. Replaying identical meta writes nothing and publishes nothing.
    ///
    /// # Errors
    ///
    /// - `Validation` when `external_id` is missing or blank, or the meta is malformed
    /// - `Conflict` when the key already names a node of another type or under
    ///   another parent (re-parenting goes through `move_node`)
    /// - everything `create_node` reports, on the creating path
    pub async fn upsert_by_external_id(
        &self,
        params: NewTimelineNode,
    ) -> Result<TimelineNode, HierarchyError> {
        let external_id = params
            .external_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ValidationError::MissingField("externalId".to_string()))?;
        let meta = meta_from_value(params.meta.clone())?;
        self.schema.validate(params.node_type, &meta)?;

        let conn = self.db.begin_write().await?;
        let outcome = self.upsert_in_tx(&conn, &external_id, params, meta).await;
        let (node, upserted) = DatabaseService::finish_transaction(&conn, outcome).await?;

        match upserted {
            Upserted::Created => {
                tracing::info!("Created {} node {} for key {}", node.node_type, node.id, external_id);
                self.emit_event(HierarchyEvent::NodeCreated { node: node.clone() });
            }
            Upserted::Updated => {
                tracing::info!("Refreshed node {} for key {}", node.id, external_id);
                self.emit_event(HierarchyEvent::NodeUpdated { node: node.clone() });
            }
            Upserted::Unchanged => {
                tracing::debug!("Node {} for key {} already up to date", node.id, external_id);
            }
        }
        Ok(node)
    }

    async fn upsert_in_tx(
        &self,
        conn: &Connection,
        external_id: &str,
        params: NewTimelineNode,
        meta: NodeMeta,
    ) -> Result<(TimelineNode, Upserted), HierarchyError> {
        let store = NodeStore::new(conn);
        let Some(mut existing) = store
            .get_by_external_id(&params.owner_id, external_id)
            .await?
        else {
            let node = self.create_in_tx(conn, params, meta).await?;
            return Ok((node, Upserted::Created));
        };

        if existing.node_type != params.node_type {
            return Err(HierarchyError::conflict(format!(
                "key {} already names {} node {}",
                external_id, existing.node_type, existing.id
            )));
        }
        if existing.parent_id != params.parent_id {
            return Err(HierarchyError::conflict(format!(
                "key {} names node {} under {:?}, not {:?}",
                external_id, existing.id, existing.parent_id, params.parent_id
            )));
        }
        if existing.meta == meta {
            return Ok((existing, Upserted::Unchanged));
        }

        let now = Utc::now();
        let changed = store
            .update_meta(&existing.id, &existing.owner_id, &meta, &now)
            .await?;
        if changed == 0 {
            return Err(HierarchyError::conflict(format!(
                "node {} changed during upsert",
                existing.id
            )));
        }

        existing.meta = meta;
        existing.updated_at = now;
        Ok((existing, Upserted::Updated))
    }

    /// Patch a node's meta
    ///
    /// Supplied fields overwrite, omitted fields are preserved, `null` clears an
    /// optional field. The merged meta is validated in full before it is written.
    /// Neither `parent_id` nor the closure table is touched.
    pub async fn update_node(
        &self,
        id: &str,
        patch: MetaPatch,
        owner_id: &str,
    ) -> Result<TimelineNode, HierarchyError> {
        let conn = self.db.begin_write().await?;
        let outcome = self.update_in_tx(&conn, id, &patch, owner_id).await;
        let node = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!("Updated meta of node {}", node.id);
        self.emit_event(HierarchyEvent::NodeUpdated { node: node.clone() });
        Ok(node)
    }

    async fn update_in_tx(
        &self,
        conn: &Connection,
        id: &str,
        patch: &MetaPatch,
        owner_id: &str,
    ) -> Result<TimelineNode, HierarchyError> {
        let store = NodeStore::new(conn);
        let mut node = load_owned(&store, id, owner_id).await?;

        let merged = self.schema.merge(node.node_type, &node.meta, patch)?;
        self.schema.validate(node.node_type, &merged)?;

        let now = Utc::now();
        let changed = store
            .update_meta(id, owner_id, &merged, &now)
            .await?;
        if changed == 0 {
            return Err(HierarchyError::conflict(format!(
                "node {} changed during update",
                id
            )));
        }

        node.meta = merged;
        node.updated_at = now;
        Ok(node)
    }

    /// Delete a node together with its whole subtree
    ///
    /// Node rows, their insights and every closure row referencing any of them
    /// are removed in one transaction. The returned ids are ordered root first.
    pub async fn delete_node(&self, id: &str, owner_id: &str) -> Result<DeleteResult, HierarchyError> {
        let conn = self.db.begin_write().await?;
        let outcome = self.delete_in_tx(&conn, id, owner_id).await;
        let result = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!(
            "Deleted node {} with {} descendant(s) and {} insight(s)",
            id,
            result.node_count().saturating_sub(1),
            result.deleted_insights
        );
        self.emit_event(HierarchyEvent::NodesDeleted {
            owner_id: owner_id.to_string(),
            node_ids: result.deleted_ids.clone(),
        });
        Ok(result)
    }

    async fn delete_in_tx(
        &self,
        conn: &Connection,
        id: &str,
        owner_id: &str,
    ) -> Result<DeleteResult, HierarchyError> {
        let store = NodeStore::new(conn);
        load_owned(&store, id, owner_id).await?;

        let closure = ClosureMaintainer::new(conn);
        let deleted_ids = closure.subtree_ids(id).await?;

        let deleted_insights = InsightStore::new(conn)
            .delete_for_nodes(&deleted_ids)
            .await?;
        closure.remove_closures_for_subtree(&deleted_ids).await?;
        let removed = store.delete_nodes(&deleted_ids).await?;

        if removed != deleted_ids.len() as u64 {
            return Err(HierarchyError::conflict(format!(
                "closure index of {} lists {} node(s) but {} were deleted",
                id,
                deleted_ids.len(),
                removed
            )));
        }

        Ok(DeleteResult {
            deleted_ids,
            deleted_insights,
        })
    }

    /// Move a node (and its subtree) under a new parent, or to the root with `None`
    ///
    /// The cycle check runs first: moving a node below itself or below one of its
    /// descendants fails with `Cycle` regardless of the target's type.
    pub async fn move_node(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
        owner_id: &str,
    ) -> Result<TimelineNode, HierarchyError> {
        let conn = self.db.begin_write().await?;
        let outcome = self.move_in_tx(&conn, id, new_parent_id, owner_id).await;
        let (node, old_parent_id) = DatabaseService::finish_transaction(&conn, outcome).await?;

        if old_parent_id != node.parent_id {
            tracing::info!(
                "Moved node {} from {:?} to {:?}",
                node.id,
                old_parent_id,
                node.parent_id
            );
            self.emit_event(HierarchyEvent::NodeMoved {
                node: node.clone(),
                old_parent_id,
            });
        }
        Ok(node)
    }

    async fn move_in_tx(
        &self,
        conn: &Connection,
        id: &str,
        new_parent_id: Option<&str>,
        owner_id: &str,
    ) -> Result<(TimelineNode, Option<String>), HierarchyError> {
        let store = NodeStore::new(conn);
        let mut node = load_owned(&store, id, owner_id).await?;

        if let Some(parent_id) = new_parent_id {
            self.validator.validate_no_cycle(conn, id, parent_id).await?;

            let parent = store
                .get_node(parent_id)
                .await?
                .ok_or_else(|| HierarchyError::node_not_found(parent_id))?;
            if parent.owner_id != owner_id {
                return Err(HierarchyError::forbidden_node(parent_id, owner_id));
            }
            self.validator.validate_new_edge(parent.node_type)?;
        }

        let old_parent_id = node.parent_id.clone();
        if old_parent_id.as_deref() == new_parent_id {
            tracing::debug!("Node {} already under {:?}, nothing to move", id, new_parent_id);
            return Ok((node, old_parent_id));
        }

        let now = Utc::now();
        let changed = store
            .set_parent(id, owner_id, new_parent_id, &now)
            .await?;
        if changed == 0 {
            return Err(HierarchyError::conflict(format!(
                "node {} changed during move",
                id
            )));
        }

        let stats = ClosureMaintainer::new(conn)
            .rewrite_subtree_on_move(id, new_parent_id)
            .await?;
        tracing::debug!(
            "Rewrote closure for subtree of {}: {} node(s), -{} / +{} rows",
            id,
            stats.subtree_size,
            stats.rows_removed,
            stats.rows_inserted
        );

        node.parent_id = new_parent_id.map(str::to_string);
        node.updated_at = now;
        Ok((node, old_parent_id))
    }

    /// Fetch a node by id
    pub async fn get_node(&self, id: &str) -> Result<Option<TimelineNode>, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(NodeStore::new(&conn).get_node(id).await?)
    }

    /// Fetch the node `owner_id` keyed with `external_id`
    pub async fn get_by_external_id(
        &self,
        owner_id: &str,
        external_id: &str,
    ) -> Result<Option<TimelineNode>, HierarchyError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(NodeStore::new(&conn)
            .get_by_external_id(owner_id, external_id)
            .await?)
    }

    /// Fetch a node by id, `NotFound` when missing
    pub async fn require_node(&self, id: &str) -> Result<TimelineNode, HierarchyError> {
        self.get_node(id)
            .await?
            .ok_or_else(|| HierarchyError::node_not_found(id))
    }

    /// Recompute every closure row of `owner_id`'s nodes from their parent pointers
    ///
    /// Returns the number of closure rows written.
    pub async fn rebuild_closures(&self, owner_id: &str) -> Result<u64, HierarchyError> {
        let conn = self.db.begin_write().await?;
        let outcome = Self::rebuild_in_tx(&conn, owner_id).await;
        let written = DatabaseService::finish_transaction(&conn, outcome).await?;

        tracing::info!("Rebuilt {} closure row(s) for owner {}", written, owner_id);
        Ok(written)
    }

    async fn rebuild_in_tx(conn: &Connection, owner_id: &str) -> Result<u64, HierarchyError> {
        let nodes = NodeStore::new(conn).list_by_owner(owner_id).await?;
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

        let closure = ClosureMaintainer::new(conn);
        closure.remove_closures_for_subtree(&ids).await?;
        Ok(closure.insert_entries(&expected_closure(&nodes)).await?)
    }
}

/// Load a node and check that `owner_id` owns it
async fn load_owned(
    store: &NodeStore<'_>,
    id: &str,
    owner_id: &str,
) -> Result<TimelineNode, HierarchyError> {
    let node = store
        .get_node(id)
        .await?
        .ok_or_else(|| HierarchyError::node_not_found(id))?;
    if node.owner_id != owner_id {
        tracing::warn!(
            "User {} attempted to modify node {} owned by {}",
            owner_id,
            id,
            node.owner_id
        );
        return Err(HierarchyError::forbidden_node(id, owner_id));
    }
    Ok(node)
}
