//! Node Store - SQL for timeline node rows
//!
//! `NodeStore` borrows a single libsql connection. Services pass the connection
//! of an open write transaction for mutations, so node rows and closure rows are
//! always written under the same `BEGIN IMMEDIATE` ... `COMMIT`. Read paths pass a
//! fresh connection instead.
//!
//! # Row Format
//!
//! Every node query selects [`NODE_COLUMNS`] in this order:
//! - id (TEXT)
//! - node_type (TEXT)
//! - owner_id (TEXT)
//! - parent_id (TEXT, nullable)
//! - meta (TEXT, JSON object)
//! - created_at (TEXT, RFC3339)
//! - updated_at (TEXT, RFC3339)
//! - external_id (TEXT, nullable)

use crate::db::database::{parse_timestamp, to_db_timestamp};
use crate::db::DatabaseError;
use crate::models::{NodeMeta, NodeType, TimelineNode};
use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Rows, Value};

pub(crate) const NODE_COLUMNS: &str =
    "n.id, n.node_type, n.owner_id, n.parent_id, n.meta, n.created_at, n.updated_at, n.external_id";

/// Ids bound per `INSERT` while staging; far below SQLite's variable limit
const STAGE_CHUNK: usize = 500;

/// Table that set-based statements read staged ids from
pub(crate) const STAGED_IDS: &str = "temp.staged_ids";

/// Load `ids` into the connection's `temp.staged_ids` table, replacing its contents.
///
/// Statements then filter with `IN (SELECT id FROM temp.staged_ids)`, so the
/// number of bound parameters never grows with the size of a subtree.
pub(crate) async fn stage_ids(conn: &Connection, ids: &[String]) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TEMP TABLE IF NOT EXISTS staged_ids (id TEXT PRIMARY KEY)",
        (),
    )
    .await
    .map_err(|e| DatabaseError::statement("Failed to create staging table", e))?;
    conn.execute(&format!("DELETE FROM {}", STAGED_IDS), ())
        .await
        .map_err(|e| DatabaseError::statement("Failed to clear staging table", e))?;

    for chunk in ids.chunks(STAGE_CHUNK) {
        let rows = vec!["(?)"; chunk.len()].join(", ");
        let params = Params::Positional(chunk.iter().map(|id| Value::Text(id.clone())).collect());
        conn.execute(
            &format!("INSERT OR IGNORE INTO {} (id) VALUES {}", STAGED_IDS, rows),
            params,
        )
        .await
        .map_err(|e| DatabaseError::statement("Failed to stage ids", e))?;
    }
    Ok(())
}

/// Node row access bound to one connection
pub struct NodeStore<'c> {
    conn: &'c Connection,
}

impl<'c> NodeStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Convert libsql::Row to TimelineNode
    ///
    /// Central conversion point for every query in this module.
    fn row_to_node(row: &Row) -> AnyResult<TimelineNode> {
        let id: String = row.get(0).context("Failed to get id")?;
        let node_type: String = row.get(1).context("Failed to get node_type")?;
        let owner_id: String = row.get(2).context("Failed to get owner_id")?;
        let parent_id: Option<String> = row.get(3).context("Failed to get parent_id")?;
        let meta_json: String = row.get(4).context("Failed to get meta")?;
        let created_at_str: String = row.get(5).context("Failed to get created_at")?;
        let updated_at_str: String = row.get(6).context("Failed to get updated_at")?;
        let external_id: Option<String> = row.get(7).context("Failed to get external_id")?;

        let node_type: NodeType = node_type
            .parse()
            .with_context(|| format!("Unknown node_type stored for node {}", id))?;
        let meta: NodeMeta =
            serde_json::from_str(&meta_json).context("Failed to parse meta JSON")?;
        let created_at = parse_timestamp(&created_at_str).context("Failed to parse created_at")?;
        let updated_at = parse_timestamp(&updated_at_str).context("Failed to parse updated_at")?;

        Ok(TimelineNode {
            id,
            node_type,
            owner_id,
            parent_id,
            meta,
            external_id,
            created_at,
            updated_at,
        })
    }

    async fn collect_nodes(mut rows: Rows) -> Result<Vec<TimelineNode>, DatabaseError> {
        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::statement("Failed to read node row", e))?
        {
            let node = Self::row_to_node(&row)
                .map_err(|e| DatabaseError::encoding(format!("{:#}", e)))?;
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn query_nodes(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        context: &str,
    ) -> Result<Vec<TimelineNode>, DatabaseError> {
        let rows = self.conn.query(sql, params).await.map_err(|e| {
            DatabaseError::statement(format!("Failed to execute {} query", context), e)
        })?;
        Self::collect_nodes(rows).await
    }

    /// Insert a fully-formed node row
    ///
    /// Does NOT touch the closure table (see `ClosureMaintainer`).
    pub async fn insert_node(&self, node: &TimelineNode) -> Result<(), DatabaseError> {
        let meta_json = serde_json::to_string(&node.meta).map_err(|e| {
            DatabaseError::encoding(format!("Failed to serialize meta: {}", e))
        })?;

        self.conn
            .execute(
                "INSERT INTO timeline_nodes
                 (id, node_type, owner_id, parent_id, meta, created_at, updated_at, external_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    node.id.as_str(),
                    node.node_type.as_str(),
                    node.owner_id.as_str(),
                    node.parent_id.as_deref(),
                    meta_json,
                    to_db_timestamp(&node.created_at),
                    to_db_timestamp(&node.updated_at),
                    node.external_id.as_deref(),
                ),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to insert node", e))?;

        Ok(())
    }

    /// Fetch a single node by id
    pub async fn get_node(&self, id: &str) -> Result<Option<TimelineNode>, DatabaseError> {
        let mut nodes = self
            .query_nodes(
                &format!("SELECT {} FROM timeline_nodes n WHERE n.id = ?", NODE_COLUMNS),
                [id],
                "get_node",
            )
            .await?;
        Ok(nodes.pop())
    }

    /// Fetch the node `owner_id` keyed with `external_id`
    pub async fn get_by_external_id(
        &self,
        owner_id: &str,
        external_id: &str,
    ) -> Result<Option<TimelineNode>, DatabaseError> {
        let mut nodes = self
            .query_nodes(
                &format!(
                    "SELECT {} FROM timeline_nodes n WHERE n.owner_id = ? AND n.external_id = ?",
                    NODE_COLUMNS
                ),
                [owner_id, external_id],
                "get_by_external_id",
            )
            .await?;
        Ok(nodes.pop())
    }

    /// Replace a node's meta
    ///
    /// Scoped to `owner_id`; returns the number of rows changed (0 when the node
    /// vanished or belongs to someone else).
    pub async fn update_meta(
        &self,
        id: &str,
        owner_id: &str,
        meta: &NodeMeta,
        updated_at: &DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let meta_json = serde_json::to_string(meta).map_err(|e| {
            DatabaseError::encoding(format!("Failed to serialize meta: {}", e))
        })?;

        self.conn
            .execute(
                "UPDATE timeline_nodes SET meta = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
                (meta_json, to_db_timestamp(updated_at), id, owner_id),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to update node meta", e))
    }

    /// Point a node at a new parent (None = root)
    pub async fn set_parent(
        &self,
        id: &str,
        owner_id: &str,
        parent_id: Option<&str>,
        updated_at: &DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.conn
            .execute(
                "UPDATE timeline_nodes SET parent_id = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
                (parent_id, to_db_timestamp(updated_at), id, owner_id),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to update parent", e))
    }

    /// Delete every node row in `ids` with one statement
    pub async fn delete_nodes(&self, ids: &[String]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }

        stage_ids(self.conn, ids).await?;
        self.conn
            .execute(
                &format!(
                    "DELETE FROM timeline_nodes WHERE id IN (SELECT id FROM {})",
                    STAGED_IDS
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to delete nodes", e))
    }

    /// All nodes owned by `owner_id`, oldest first
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM timeline_nodes n WHERE n.owner_id = ?
                 ORDER BY n.created_at ASC, n.rowid ASC",
                NODE_COLUMNS
            ),
            [owner_id],
            "list_by_owner",
        )
        .await
    }

    /// Nodes owned by `owner_id` that have no parent
    pub async fn roots(&self, owner_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM timeline_nodes n WHERE n.owner_id = ? AND n.parent_id IS NULL
                 ORDER BY n.created_at ASC, n.rowid ASC",
                NODE_COLUMNS
            ),
            [owner_id],
            "roots",
        )
        .await
    }

    /// Direct children, via closure rows at depth 1
    pub async fn children_of(&self, node_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM node_closure c
                 JOIN timeline_nodes n ON n.id = c.descendant_id
                 WHERE c.ancestor_id = ? AND c.depth = 1
                 ORDER BY n.created_at ASC, n.rowid ASC",
                NODE_COLUMNS
            ),
            [node_id],
            "children",
        )
        .await
    }

    /// Strict descendants (node itself excluded), shallowest first
    pub async fn descendants_of(&self, node_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM node_closure c
                 JOIN timeline_nodes n ON n.id = c.descendant_id
                 WHERE c.ancestor_id = ? AND c.depth > 0
                 ORDER BY c.depth ASC, n.created_at ASC, n.rowid ASC",
                NODE_COLUMNS
            ),
            [node_id],
            "descendants",
        )
        .await
    }

    /// Strict ancestors, nearest parent first
    pub async fn ancestors_of(&self, node_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM node_closure c
                 JOIN timeline_nodes n ON n.id = c.ancestor_id
                 WHERE c.descendant_id = ? AND c.depth > 0
                 ORDER BY c.depth ASC",
                NODE_COLUMNS
            ),
            [node_id],
            "ancestors",
        )
        .await
    }

    /// A node plus all of its descendants, shallowest first
    pub async fn subtree_of(&self, node_id: &str) -> Result<Vec<TimelineNode>, DatabaseError> {
        self.query_nodes(
            &format!(
                "SELECT {} FROM node_closure c
                 JOIN timeline_nodes n ON n.id = c.descendant_id
                 WHERE c.ancestor_id = ?
                 ORDER BY c.depth ASC, n.created_at ASC, n.rowid ASC",
                NODE_COLUMNS
            ),
            [node_id],
            "subtree",
        )
        .await
    }
}
