//! Insight Store - SQL for `node_insights`
//!
//! Same borrowing model as `NodeStore`: the caller decides whether the
//! connection carries an open write transaction.

use crate::db::database::{parse_timestamp, to_db_timestamp};
use crate::db::node_store::{stage_ids, STAGED_IDS};
use crate::db::DatabaseError;
use crate::models::Insight;
use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use libsql::{Connection, Row};

const INSIGHT_COLUMNS: &str = "id, node_id, author_id, content, created_at, updated_at";

pub struct InsightStore<'c> {
    conn: &'c Connection,
}

impl<'c> InsightStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn row_to_insight(row: &Row) -> AnyResult<Insight> {
        let created_at: String = row.get(4).context("Failed to get created_at")?;
        let updated_at: String = row.get(5).context("Failed to get updated_at")?;

        Ok(Insight {
            id: row.get(0).context("Failed to get id")?,
            node_id: row.get(1).context("Failed to get node_id")?,
            author_id: row.get(2).context("Failed to get author_id")?,
            content: row.get(3).context("Failed to get content")?,
            created_at: parse_timestamp(&created_at).context("Failed to parse created_at")?,
            updated_at: parse_timestamp(&updated_at).context("Failed to parse updated_at")?,
        })
    }

    async fn query_insights(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Insight>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::statement("Failed to query insights", e))?;

        let mut insights = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(DatabaseError::LibsqlError)?
        {
            insights.push(
                Self::row_to_insight(&row)
                    .map_err(|e| DatabaseError::encoding(format!("{:#}", e)))?,
            );
        }
        Ok(insights)
    }

    pub async fn insert(&self, insight: &Insight) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO node_insights (id, node_id, author_id, content, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    insight.id.as_str(),
                    insight.node_id.as_str(),
                    insight.author_id.as_str(),
                    insight.content.as_str(),
                    to_db_timestamp(&insight.created_at),
                    to_db_timestamp(&insight.updated_at),
                ),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to insert insight", e))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Insight>, DatabaseError> {
        let mut insights = self
            .query_insights(
                &format!("SELECT {} FROM node_insights WHERE id = ?", INSIGHT_COLUMNS),
                [id],
            )
            .await?;
        Ok(insights.pop())
    }

    /// Insights of one node, oldest first
    pub async fn list_for_node(&self, node_id: &str) -> Result<Vec<Insight>, DatabaseError> {
        self.query_insights(
            &format!(
                "SELECT {} FROM node_insights WHERE node_id = ?
                 ORDER BY created_at ASC, rowid ASC",
                INSIGHT_COLUMNS
            ),
            [node_id],
        )
        .await
    }

    pub async fn update_content(
        &self,
        id: &str,
        content: &str,
        updated_at: &DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        self.conn
            .execute(
                "UPDATE node_insights SET content = ?, updated_at = ? WHERE id = ?",
                (content, to_db_timestamp(updated_at), id),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to update insight", e))
    }

    pub async fn delete(&self, id: &str) -> Result<u64, DatabaseError> {
        self.conn
            .execute("DELETE FROM node_insights WHERE id = ?", [id])
            .await
            .map_err(|e| DatabaseError::statement("Failed to delete insight", e))
    }

    /// Remove every insight attached to any of `node_ids`
    pub async fn delete_for_nodes(&self, node_ids: &[String]) -> Result<u64, DatabaseError> {
        if node_ids.is_empty() {
            return Ok(0);
        }

        stage_ids(self.conn, node_ids).await?;
        self.conn
            .execute(
                &format!(
                    "DELETE FROM node_insights WHERE node_id IN (SELECT id FROM {})",
                    STAGED_IDS
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::statement("Failed to delete node insights", e))
    }
}
